//! # Capture Pipeline
//!
//! Owns the microphone for the duration of a voice session and hands the
//! session fixed-size frames of mono float samples.
//!
//! Device backends push whatever buffer sizes the hardware produces into a
//! [`FrameTap`]; the tap re-blocks them into exact frames and calls the
//! installed handler. Clearing the handler happens under the same lock the
//! delivery path holds, so once [`CapturePipeline::stop`] returns no further
//! frame reaches the session.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Frame size matching a 4096-sample script-processor style callback.
pub const DEFAULT_FRAME_SIZE: usize = 4096;

const RELEASE_POLL: Duration = Duration::from_millis(5);

pub type FrameHandler = Box<dyn FnMut(&[f32]) + Send>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("no usable microphone: {0}")]
    DeviceUnavailable(String),

    #[error("capture is already running")]
    AlreadyRunning,
}

struct TapInner {
    handler: Option<FrameHandler>,
    pending: VecDeque<f32>,
    frame_size: usize,
    frames_delivered: u64,
}

/// Shared entry point between a device callback and the session.
#[derive(Clone)]
pub struct FrameTap {
    inner: Arc<Mutex<TapInner>>,
}

impl FrameTap {
    pub fn new(frame_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TapInner {
                handler: None,
                pending: VecDeque::with_capacity(frame_size * 2),
                frame_size: frame_size.max(1),
                frames_delivered: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TapInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Feed device samples. Complete frames go to the handler; the remainder
    /// waits for the next push. Without a handler, samples are discarded.
    pub fn push(&self, samples: &[f32]) {
        let mut inner = self.lock();
        let TapInner {
            handler,
            pending,
            frame_size,
            frames_delivered,
        } = &mut *inner;

        let Some(handler) = handler.as_mut() else {
            pending.clear();
            return;
        };

        pending.extend(samples.iter().copied());
        let mut frame = Vec::with_capacity(*frame_size);
        while pending.len() >= *frame_size {
            frame.clear();
            frame.extend(pending.drain(..*frame_size));
            handler(&frame);
            *frames_delivered += 1;
        }
    }

    fn install(&self, handler: FrameHandler) {
        let mut inner = self.lock();
        inner.pending.clear();
        inner.handler = Some(handler);
    }

    fn clear(&self) -> bool {
        let mut inner = self.lock();
        inner.pending.clear();
        inner.handler.take().is_some()
    }

    pub fn is_active(&self) -> bool {
        self.lock().handler.is_some()
    }

    pub fn frame_size(&self) -> usize {
        self.lock().frame_size
    }

    pub fn frames_delivered(&self) -> u64 {
        self.lock().frames_delivered
    }
}

/// A microphone the pipeline can open and close.
///
/// `acquire` is where permission is requested; on success the source starts
/// pushing samples into the tap until `release`.
pub trait MicrophoneSource: Send {
    fn acquire(&mut self, tap: FrameTap) -> Result<(), CaptureError>;

    fn release(&mut self);

    fn describe(&self) -> String {
        "microphone".to_string()
    }
}

pub struct CapturePipeline {
    source: Box<dyn MicrophoneSource>,
    tap: FrameTap,
    acquired: bool,
}

impl CapturePipeline {
    pub fn new(source: Box<dyn MicrophoneSource>, frame_size: usize) -> Self {
        Self {
            source,
            tap: FrameTap::new(frame_size),
            acquired: false,
        }
    }

    /// Request the microphone without delivering frames yet.
    pub fn acquire(&mut self) -> Result<(), CaptureError> {
        if self.acquired {
            return Ok(());
        }
        self.source.acquire(self.tap.clone())?;
        self.acquired = true;
        info!("Microphone acquired: {}", self.source.describe());
        Ok(())
    }

    /// Begin delivering frames to `on_frame`, acquiring the device first if
    /// needed.
    pub fn start<F>(&mut self, on_frame: F) -> Result<(), CaptureError>
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        if self.tap.is_active() {
            return Err(CaptureError::AlreadyRunning);
        }
        self.acquire()?;
        self.tap.install(Box::new(on_frame));
        debug!("Capture started ({} samples per frame)", self.tap.frame_size());
        Ok(())
    }

    /// Stop frame delivery. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.tap.clear() {
            debug!(
                "Capture stopped after {} frames",
                self.tap.frames_delivered()
            );
        }
    }

    /// Stop delivery and give the device back. Safe to call repeatedly.
    pub fn release(&mut self) {
        self.stop();
        if self.acquired {
            self.source.release();
            self.acquired = false;
            info!("Microphone released");
        }
    }

    pub fn is_running(&self) -> bool {
        self.tap.is_active()
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    pub fn frames_delivered(&self) -> u64 {
        self.tap.frames_delivered()
    }

    pub fn describe_source(&self) -> String {
        self.source.describe()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.release();
    }
}

/// Microphone stand-in for builds without sound devices: pushes silence at
/// the real-time cadence of the configured rate.
pub struct SilentMicrophone {
    sample_rate: u32,
    chunk: usize,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SilentMicrophone {
    pub fn new(sample_rate: u32, chunk: usize) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            chunk: chunk.max(1),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl MicrophoneSource for SilentMicrophone {
    fn acquire(&mut self, tap: FrameTap) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let chunk = self.chunk;
        let interval = Duration::from_secs_f64(chunk as f64 / self.sample_rate as f64);

        let worker = std::thread::Builder::new()
            .name("silent-mic".to_string())
            .spawn(move || {
                let silence = vec![0.0f32; chunk];
                let mut next = Instant::now();
                while running.load(Ordering::SeqCst) {
                    let now = Instant::now();
                    if now >= next {
                        tap.push(&silence);
                        next += interval;
                        continue;
                    }
                    // Short naps keep release prompt whatever the chunk length.
                    std::thread::sleep((next - now).min(RELEASE_POLL));
                }
            })
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
        self.worker = Some(worker);
        Ok(())
    }

    fn release(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Silent microphone thread panicked");
            }
        }
    }

    fn describe(&self) -> String {
        format!("silence @ {} Hz", self.sample_rate)
    }
}
