//! # Playback Scheduler
//!
//! Places decoded response audio back-to-back on the output clock so
//! consecutive chunks play without gaps or overlap, and keeps the set of
//! segments that are scheduled but not yet finished so they can all be
//! silenced at once.
//!
//! ## Scheduling Rule:
//! ```text
//! start    = max(cursor, now)
//! cursor   = start + duration
//! ```
//! The cursor only moves forward between resets, so start times are
//! non-decreasing. If the cursor fell behind the clock (a network stall),
//! the next chunk starts immediately instead of in the past.
//!
//! ## Key Rust Concepts:
//! - **Trait objects**: `Box<dyn AudioOutput>` hides the real device behind
//!   a clock-plus-start/stop seam
//! - **mpsc channels**: the output reports finished segments asynchronously,
//!   and the scheduler drains them on its own task

use crate::audio::codec::PcmBuffer;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

pub type SegmentId = u64;

/// One decoded chunk placed on the output timeline.
#[derive(Debug, Clone)]
pub struct PlaybackSegment {
    pub id: SegmentId,
    pub buffer: Arc<PcmBuffer>,
    /// Seconds on the output clock.
    pub start_time: f64,
    pub duration: f64,
}

impl PlaybackSegment {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("audio output unavailable: {0}")]
    OutputUnavailable(String),
}

/// An output device with its own monotonic clock.
pub trait AudioOutput: Send {
    /// Current position of the output clock in seconds.
    fn current_time(&self) -> f64;

    /// Arrange for `segment` to play at `segment.start_time`. When it finishes
    /// naturally, the output sends its id on `on_ended`.
    fn start(
        &mut self,
        segment: &PlaybackSegment,
        on_ended: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<(), PlaybackError>;

    /// Silence a segment now. Must not report it as ended afterwards.
    fn stop(&mut self, id: SegmentId);

    fn close(&mut self) {}

    fn describe(&self) -> String {
        "audio output".to_string()
    }
}

pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    live: BTreeMap<SegmentId, PlaybackSegment>,
    next_start_time: f64,
    next_id: SegmentId,
    ended_tx: mpsc::UnboundedSender<SegmentId>,
    ended_rx: mpsc::UnboundedReceiver<SegmentId>,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        Self {
            output,
            live: BTreeMap::new(),
            next_start_time: 0.0,
            next_id: 1,
            ended_tx,
            ended_rx,
        }
    }

    /// Schedule `buffer` right after everything already scheduled, or now if
    /// the timeline has drained. Returns the placed segment.
    pub fn enqueue(&mut self, buffer: PcmBuffer) -> Result<PlaybackSegment, PlaybackError> {
        let now = self.output.current_time();
        let start_time = self.next_start_time.max(now);
        let segment = PlaybackSegment {
            id: self.next_id,
            duration: buffer.duration(),
            buffer: Arc::new(buffer),
            start_time,
        };

        self.output.start(&segment, self.ended_tx.clone())?;

        self.next_id += 1;
        self.next_start_time = segment.end_time();
        trace!(
            "Segment {} scheduled at {:.3}s for {:.3}s (now {:.3}s)",
            segment.id,
            segment.start_time,
            segment.duration,
            now
        );
        self.live.insert(segment.id, segment.clone());
        Ok(segment)
    }

    /// Drop a finished segment from the live set. Unknown ids are ignored.
    pub fn segment_ended(&mut self, id: SegmentId) -> bool {
        let removed = self.live.remove(&id).is_some();
        if removed {
            trace!("Segment {} finished, {} still live", id, self.live.len());
        }
        removed
    }

    /// Wait for the next natural end reported by the output.
    pub async fn next_ended(&mut self) -> Option<SegmentId> {
        self.ended_rx.recv().await
    }

    /// Silence everything, forget it, and rewind the cursor.
    pub fn stop_all(&mut self) {
        let count = self.live.len();
        for id in std::mem::take(&mut self.live).into_keys() {
            self.output.stop(id);
        }
        self.next_start_time = 0.0;
        while self.ended_rx.try_recv().is_ok() {}
        if count > 0 {
            debug!("Stopped {} scheduled segments", count);
        }
    }

    /// Stop everything and release the output device.
    pub fn close(&mut self) {
        self.stop_all();
        self.output.close();
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_segments(&self) -> impl Iterator<Item = &PlaybackSegment> {
        self.live.values()
    }

    /// Cursor position: where the next chunk will start at the earliest.
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    pub fn describe_output(&self) -> String {
        self.output.describe()
    }
}

/// Output that plays nothing but keeps time with the tokio clock and reports
/// segment ends when they would have finished.
///
/// Must be used from inside a tokio runtime.
pub struct VirtualOutput {
    origin: Instant,
    timers: BTreeMap<SegmentId, JoinHandle<()>>,
}

impl VirtualOutput {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            timers: BTreeMap::new(),
        }
    }
}

impl Default for VirtualOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for VirtualOutput {
    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn start(
        &mut self,
        segment: &PlaybackSegment,
        on_ended: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<(), PlaybackError> {
        let id = segment.id;
        let end = self.origin + Duration::from_secs_f64(segment.end_time().max(0.0));
        self.timers.retain(|_, timer| !timer.is_finished());
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(end).await;
            let _ = on_ended.send(id);
        });
        self.timers.insert(id, timer);
        Ok(())
    }

    fn stop(&mut self, id: SegmentId) {
        if let Some(timer) = self.timers.remove(&id) {
            timer.abort();
        }
    }

    fn close(&mut self) {
        let pending = self.timers.len();
        for (_, timer) in std::mem::take(&mut self.timers) {
            timer.abort();
        }
        if pending > 0 {
            warn!("Virtual output closed with {} timers pending", pending);
        }
    }

    fn describe(&self) -> String {
        "virtual output".to_string()
    }
}
