//! Test doubles for the voice pipeline: a scripted microphone, an output with
//! a hand-driven clock, and a connector whose remote end the test plays.

use crate::audio::capture::{CaptureError, FrameTap, MicrophoneSource};
use crate::audio::playback::{AudioOutput, PlaybackError, PlaybackSegment, SegmentId};
use crate::voice::channel::{ChannelConnector, ChannelHandle, ConnectRequest, RemoteEnd};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Microphone that never produces audio on its own; tests push samples
/// through the tap it was given.
#[derive(Clone, Default)]
pub struct ScriptedMicrophone {
    deny: Option<String>,
    tap: Arc<Mutex<Option<FrameTap>>>,
    releases: Arc<AtomicUsize>,
}

impl ScriptedMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denying(reason: &str) -> Self {
        Self {
            deny: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn tap(&self) -> Option<FrameTap> {
        self.tap.lock().unwrap().clone()
    }

    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        self.releases.clone()
    }
}

impl MicrophoneSource for ScriptedMicrophone {
    fn acquire(&mut self, tap: FrameTap) -> Result<(), CaptureError> {
        if let Some(reason) = &self.deny {
            return Err(CaptureError::PermissionDenied(reason.clone()));
        }
        *self.tap.lock().unwrap() = Some(tap);
        Ok(())
    }

    fn release(&mut self) {
        self.tap.lock().unwrap().take();
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct ManualClock(Arc<Mutex<f64>>);

impl ManualClock {
    pub fn set(&self, seconds: f64) {
        *self.0.lock().unwrap() = seconds;
    }

    pub fn get(&self) -> f64 {
        *self.0.lock().unwrap()
    }
}

type EndedSenders = Arc<Mutex<HashMap<SegmentId, mpsc::UnboundedSender<SegmentId>>>>;

/// Reports a scheduled segment as finished, as the device would.
#[derive(Clone)]
pub struct SegmentFinisher(EndedSenders);

impl SegmentFinisher {
    pub fn finish(&self, id: SegmentId) -> bool {
        match self.0.lock().unwrap().remove(&id) {
            Some(sender) => sender.send(id).is_ok(),
            None => false,
        }
    }
}

#[derive(Default)]
pub struct ManualOutput {
    clock: ManualClock,
    pending: EndedSenders,
    stopped: Arc<Mutex<Vec<SegmentId>>>,
}

impl ManualOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    pub fn stopped(&self) -> Arc<Mutex<Vec<SegmentId>>> {
        self.stopped.clone()
    }

    pub fn finisher(&self) -> SegmentFinisher {
        SegmentFinisher(self.pending.clone())
    }
}

impl AudioOutput for ManualOutput {
    fn current_time(&self) -> f64 {
        self.clock.get()
    }

    fn start(
        &mut self,
        segment: &PlaybackSegment,
        on_ended: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<(), PlaybackError> {
        self.pending.lock().unwrap().insert(segment.id, on_ended);
        Ok(())
    }

    fn stop(&mut self, id: SegmentId) {
        self.pending.lock().unwrap().remove(&id);
        self.stopped.lock().unwrap().push(id);
    }
}

/// Connector that hands every opened channel's remote end to the test.
#[derive(Default)]
pub struct ScriptedConnector {
    remotes: Mutex<Vec<RemoteEnd>>,
    opened: AtomicUsize,
}

/// Borrow of the most recently opened remote end.
pub struct LatestRemote<'a>(MutexGuard<'a, Vec<RemoteEnd>>);

impl Deref for LatestRemote<'_> {
    type Target = RemoteEnd;

    fn deref(&self) -> &RemoteEnd {
        self.0.last().expect("no channel has been opened")
    }
}

impl DerefMut for LatestRemote<'_> {
    fn deref_mut(&mut self) -> &mut RemoteEnd {
        self.0.last_mut().expect("no channel has been opened")
    }
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn remote(&self) -> LatestRemote<'_> {
        LatestRemote(self.remotes.lock().unwrap())
    }
}

impl ChannelConnector for ScriptedConnector {
    fn open(&self, _request: &ConnectRequest, input_capacity: usize) -> ChannelHandle {
        let (handle, remote) = ChannelHandle::pair(input_capacity);
        self.remotes.lock().unwrap().push(remote);
        self.opened.fetch_add(1, Ordering::SeqCst);
        handle
    }
}
