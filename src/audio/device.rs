//! # Sound Devices
//!
//! cpal-backed microphone and speaker. Streams live on their own threads
//! because a cpal stream is not `Send` on every host; the rest of the crate
//! only sees the [`MicrophoneSource`] and [`AudioOutput`] traits.
//!
//! ## Key Rust Concepts:
//! - **Generic callbacks**: one stream builder per sample type via `SizedSample`
//! - **Shared mixer**: the output callback and the scheduler meet in an `Arc<Mutex<_>>`
//! - **Ready handshake**: the stream thread reports build errors back over a channel

use crate::audio::capture::{CaptureError, FrameTap, MicrophoneSource};
use crate::audio::codec::PcmBuffer;
use crate::audio::resample::Resampler;
use crate::audio::playback::{AudioOutput, PlaybackError, PlaybackSegment, SegmentId};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const STREAM_POLL: Duration = Duration::from_millis(10);

/// Which device to open. An empty name or "default" picks the host default.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceSelector {
    #[default]
    Default,
    Named(String),
}

impl std::str::FromStr for DeviceSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Ok(DeviceSelector::Default),
            name if name.eq_ignore_ascii_case("default") => Ok(DeviceSelector::Default),
            name => Ok(DeviceSelector::Named(name.to_string())),
        }
    }
}

pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            warn!("Could not enumerate input devices: {}", e);
            Vec::new()
        }
    }
}

fn find_input(selector: &DeviceSelector) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    match selector {
        DeviceSelector::Default => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".to_string())),
        DeviceSelector::Named(name) => host
            .input_devices()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceUnavailable(format!("input device '{}' not found", name))),
    }
}

fn find_output(selector: &DeviceSelector) -> Result<cpal::Device, PlaybackError> {
    let host = cpal::default_host();
    match selector {
        DeviceSelector::Default => host
            .default_output_device()
            .ok_or_else(|| PlaybackError::OutputUnavailable("no default output device".to_string())),
        DeviceSelector::Named(name) => host
            .output_devices()
            .map_err(|e| PlaybackError::OutputUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
            .ok_or_else(|| PlaybackError::OutputUnavailable(format!("output device '{}' not found", name))),
    }
}

/// Host messages that mean the OS refused microphone access.
const ACCESS_DENIED_MARKERS: [&str; 4] = [
    "permission denied",
    "operation not permitted",
    "access denied",
    "not authorized",
];

fn is_access_denied(description: &str) -> bool {
    let lower = description.to_lowercase();
    ACCESS_DENIED_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn capture_error(err: cpal::BuildStreamError) -> CaptureError {
    match err {
        cpal::BuildStreamError::BackendSpecific { err } if is_access_denied(&err.description) => {
            CaptureError::PermissionDenied(err.description)
        }
        other => CaptureError::DeviceUnavailable(other.to_string()),
    }
}

fn downmix<T: Sample>(data: &[T], channels: usize, mono: &mut Vec<f32>)
where
    f32: FromSample<T>,
{
    mono.clear();
    for frame in data.chunks(channels.max(1)) {
        let sum: f32 = frame.iter().map(|s| s.to_sample::<f32>()).sum();
        mono.push(sum / frame.len() as f32);
    }
}

struct StreamThread {
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Build a stream on a dedicated thread and wait for it to start.
    fn spawn<E, B>(name: &str, build: B) -> Result<Self, E>
    where
        E: Send + 'static + From<String>,
        B: FnOnce() -> Result<cpal::Stream, E> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let keep_going = running.clone();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), E>>();

        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(E::from(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                while keep_going.load(Ordering::SeqCst) {
                    std::thread::sleep(STREAM_POLL);
                }
                if let Err(e) = stream.pause() {
                    debug!("Failed to pause stream: {}", e);
                }
            })
            .map_err(|e| E::from(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                running,
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(E::from(format!("{} thread exited before the stream started", name)))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Audio stream thread panicked");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

impl From<String> for CaptureError {
    fn from(message: String) -> Self {
        CaptureError::DeviceUnavailable(message)
    }
}

impl From<String> for PlaybackError {
    fn from(message: String) -> Self {
        PlaybackError::OutputUnavailable(message)
    }
}

/// Microphone read through cpal, downmixed to mono and resampled to the
/// codec's input rate before it reaches the frame tap.
pub struct CpalMicrophone {
    selector: DeviceSelector,
    target_rate: u32,
    stream: Option<StreamThread>,
}

impl CpalMicrophone {
    pub fn new(selector: DeviceSelector, target_rate: u32) -> Self {
        Self {
            selector,
            target_rate,
            stream: None,
        }
    }

    fn build<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        tap: FrameTap,
        target_rate: u32,
    ) -> Result<cpal::Stream, CaptureError>
    where
        T: SizedSample + Send + 'static,
        f32: FromSample<T>,
    {
        let channels = usize::from(config.channels.max(1));
        let mut resampler = Resampler::new(config.sample_rate.0, target_rate, 1)
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
        let mut mono = vec![Vec::new()];

        device
            .build_input_stream(
                config,
                move |data: &[T], _| {
                    downmix(data, channels, &mut mono[0]);
                    match resampler.process(&mono) {
                        Ok(resampled) => tap.push(&resampled[0]),
                        Err(e) => warn!("Dropping microphone buffer: {}", e),
                    }
                },
                |err| warn!("Input stream error: {}", err),
                None,
            )
            .map_err(capture_error)
    }
}

impl MicrophoneSource for CpalMicrophone {
    fn acquire(&mut self, tap: FrameTap) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let selector = self.selector.clone();
        let target_rate = self.target_rate;

        let stream = StreamThread::spawn("mic-stream", move || {
            let device = find_input(&selector)?;
            let supported = device
                .default_input_config()
                .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
            let format = supported.sample_format();
            let config: StreamConfig = supported.into();
            info!(
                "Opening microphone {} ({:?}, {} Hz, {} ch)",
                device.name().unwrap_or_else(|_| "unknown".to_string()),
                format,
                config.sample_rate.0,
                config.channels
            );
            match format {
                SampleFormat::F32 => Self::build::<f32>(&device, &config, tap, target_rate),
                SampleFormat::I16 => Self::build::<i16>(&device, &config, tap, target_rate),
                SampleFormat::U16 => Self::build::<u16>(&device, &config, tap, target_rate),
                other => Err(CaptureError::DeviceUnavailable(format!(
                    "unsupported sample format: {:?}",
                    other
                ))),
            }
        })?;
        self.stream = Some(stream);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            debug!("Microphone released");
        }
    }

    fn describe(&self) -> String {
        match &self.selector {
            DeviceSelector::Default => "default microphone".to_string(),
            DeviceSelector::Named(name) => format!("microphone '{}'", name),
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

/// Convert a decoded segment to the device rate before it is mixed.
fn resample_buffer(buffer: &PcmBuffer, to_rate: u32) -> Result<PcmBuffer, PlaybackError> {
    if buffer.sample_rate == to_rate || buffer.channels.is_empty() {
        return Ok(buffer.clone());
    }
    let channels = Resampler::new(buffer.sample_rate, to_rate, buffer.channels.len())
        .and_then(|mut resampler| resampler.process_all(&buffer.channels))
        .map_err(|e| PlaybackError::OutputUnavailable(e.to_string()))?;
    Ok(PcmBuffer {
        sample_rate: to_rate,
        channels,
    })
}

struct Voice {
    id: SegmentId,
    start_frame: u64,
    buffer: PcmBuffer,
    ended: mpsc::UnboundedSender<SegmentId>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.buffer.frame_count() as u64
    }

    fn sample(&self, frame: u64, channel: usize) -> f32 {
        if frame < self.start_frame {
            return 0.0;
        }
        let index = (frame - self.start_frame) as usize;
        let source = channel.min(self.buffer.channel_count().saturating_sub(1));
        self.buffer
            .channel(source)
            .and_then(|samples| samples.get(index))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Sums every scheduled segment into the device callback. The rendered
/// frame count is the output clock.
struct Mixer {
    sample_rate: u32,
    channels: usize,
    frames_rendered: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    fn render<T>(&mut self, out: &mut [T])
    where
        T: Sample + FromSample<f32>,
    {
        let channels = self.channels.max(1);
        for (n, frame) in out.chunks_mut(channels).enumerate() {
            let at = self.frames_rendered + n as u64;
            for (c, slot) in frame.iter_mut().enumerate() {
                let mixed: f32 = self.voices.iter().map(|v| v.sample(at, c)).sum();
                *slot = T::from_sample(mixed.clamp(-1.0, 1.0));
            }
        }
        self.frames_rendered += (out.len() / channels) as u64;

        let now = self.frames_rendered;
        self.voices.retain(|voice| {
            if voice.end_frame() <= now {
                let _ = voice.ended.send(voice.id);
                false
            } else {
                true
            }
        });
    }
}

fn lock_mixer(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Speaker driven by cpal with sample-accurate segment starts.
pub struct CpalSpeaker {
    mixer: Arc<Mutex<Mixer>>,
    stream: Option<StreamThread>,
    description: String,
}

impl CpalSpeaker {
    pub fn open(selector: &DeviceSelector) -> Result<Self, PlaybackError> {
        let device = find_output(selector)?;
        let supported = device
            .default_output_config()
            .map_err(|e| PlaybackError::OutputUnavailable(e.to_string()))?;
        let format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let description = format!(
            "speaker {} ({} Hz, {} ch)",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.sample_rate.0,
            config.channels
        );
        let mixer = Arc::new(Mutex::new(Mixer {
            sample_rate: config.sample_rate.0,
            channels: usize::from(config.channels.max(1)),
            frames_rendered: 0,
            voices: Vec::new(),
        }));

        let shared = mixer.clone();
        let stream = StreamThread::spawn("speaker-stream", move || match format {
            SampleFormat::F32 => Self::build::<f32>(&device, &config, shared),
            SampleFormat::I16 => Self::build::<i16>(&device, &config, shared),
            SampleFormat::U16 => Self::build::<u16>(&device, &config, shared),
            other => Err(PlaybackError::OutputUnavailable(format!(
                "unsupported sample format: {:?}",
                other
            ))),
        })?;
        info!("Opened {}", description);

        Ok(Self {
            mixer,
            stream: Some(stream),
            description,
        })
    }

    fn build<T>(
        device: &cpal::Device,
        config: &StreamConfig,
        mixer: Arc<Mutex<Mixer>>,
    ) -> Result<cpal::Stream, PlaybackError>
    where
        T: SizedSample + FromSample<f32> + Send + 'static,
    {
        device
            .build_output_stream(
                config,
                move |out: &mut [T], _| lock_mixer(&mixer).render(out),
                |err| warn!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| PlaybackError::OutputUnavailable(e.to_string()))
    }
}

impl AudioOutput for CpalSpeaker {
    fn current_time(&self) -> f64 {
        let mixer = lock_mixer(&self.mixer);
        mixer.frames_rendered as f64 / mixer.sample_rate.max(1) as f64
    }

    fn start(
        &mut self,
        segment: &PlaybackSegment,
        on_ended: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<(), PlaybackError> {
        if self.stream.is_none() {
            return Err(PlaybackError::OutputUnavailable("speaker is closed".to_string()));
        }
        let device_rate = lock_mixer(&self.mixer).sample_rate;
        let buffer = resample_buffer(&segment.buffer, device_rate)?;
        let mut mixer = lock_mixer(&self.mixer);
        let start_frame = (segment.start_time.max(0.0) * mixer.sample_rate as f64).round() as u64;
        mixer.voices.push(Voice {
            id: segment.id,
            start_frame: start_frame.max(mixer.frames_rendered),
            buffer,
            ended: on_ended,
        });
        Ok(())
    }

    fn stop(&mut self, id: SegmentId) {
        lock_mixer(&self.mixer).voices.retain(|v| v.id != id);
    }

    fn close(&mut self) {
        lock_mixer(&self.mixer).voices.clear();
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

impl Drop for CpalSpeaker {
    fn drop(&mut self) {
        self.close();
    }
}
