//! # Session Lifecycle Controller
//!
//! Owns everything one voice session touches: the capture pipeline, the
//! playback scheduler, and the channel handle. State changes go through the
//! pure [`transition`] function; this type only executes the effects it
//! returns.
//!
//! ## Event Sources:
//! - **User**: [`SessionController::connect`] and [`SessionController::disconnect`]
//! - **Channel**: opened, audio, control, closed, error
//! - **Playback**: segment finished
//!
//! All three are handled on the task that drives [`SessionController::step`],
//! one at a time. The capture callback runs on the device thread but only
//! encodes and hands frames to the outbound queue; it never touches session
//! state.
//!
//! ## Connect Sequence:
//! ```text
//! connect()  → acquire microphone → open channel → (Opened) → start capture
//!                    │ denied
//!                    └──────→ IDLE, error returned, no channel opened
//! ```

use crate::audio::capture::CapturePipeline;
use crate::audio::codec::AudioCodec;
use crate::audio::playback::{PlaybackScheduler, PlaybackSegment, SegmentId};
use crate::config::AudioConfig;
use crate::state::AppState;
use crate::voice::channel::{
    ChannelConnector, ChannelEvent, ChannelHandle, ConnectRequest, ControlEvent, PushOutcome,
};
use crate::voice::state::{transition, Effect, SessionEvent, SessionState};
use crate::voice::VoiceError;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Per-session audio parameters.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub codec: AudioCodec,
    pub output_sample_rate: u32,
    pub output_channels: usize,
    pub outbound_queue_frames: usize,
}

impl SessionOptions {
    pub fn from_config(audio: &AudioConfig) -> Self {
        Self {
            codec: AudioCodec::new(audio.input_sample_rate, audio.overflow_policy),
            output_sample_rate: audio.output_sample_rate,
            output_channels: audio.channels,
            outbound_queue_frames: audio.outbound_queue_frames,
        }
    }
}

enum Incoming {
    Channel(Option<ChannelEvent>),
    PlaybackEnded(SegmentId),
}

pub struct SessionController {
    state: SessionState,
    capture: CapturePipeline,
    playback: PlaybackScheduler,
    connector: Arc<dyn ChannelConnector>,
    channel: Option<ChannelHandle>,
    request: ConnectRequest,
    options: SessionOptions,
    app: AppState,
    status: watch::Sender<SessionState>,
    last_error: Option<String>,
    connect_failure: Option<VoiceError>,
}

impl SessionController {
    pub fn new(
        capture: CapturePipeline,
        playback: PlaybackScheduler,
        connector: Arc<dyn ChannelConnector>,
        request: ConnectRequest,
        options: SessionOptions,
        app: AppState,
    ) -> Self {
        let (status, _) = watch::channel(SessionState::Idle);
        Self {
            state: SessionState::Idle,
            capture,
            playback,
            connector,
            channel: None,
            request,
            options,
            app,
            status,
            last_error: None,
            connect_failure: None,
        }
    }

    /// Start a session. The microphone is requested before anything else, so
    /// a denial returns here with the controller back in IDLE and no channel
    /// opened. Otherwise the controller waits in CONNECTING for the channel
    /// to report open; drive it with [`step`](Self::step).
    pub fn connect(&mut self) -> Result<(), VoiceError> {
        if self.state.is_active() {
            debug!("Ignoring connect while {}", self.state);
            return Err(VoiceError::AlreadyActive(self.state));
        }
        self.last_error = None;
        self.connect_failure = None;
        self.app.record_session_started();

        self.handle(SessionEvent::Connect);

        match self.connect_failure.take() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    /// End the session and release everything. Safe to call in any state
    /// and any number of times.
    pub fn disconnect(&mut self) {
        self.handle(SessionEvent::Disconnect);
    }

    /// Feed one lifecycle event through the state machine and run the
    /// resulting effects, including any follow-up events they produce.
    pub fn handle(&mut self, event: SessionEvent) {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            let previous = self.state;
            let (next, effects) = transition(previous, event);
            self.state = next;
            if next != previous {
                info!("Voice session {} -> {}", previous, next);
                self.status.send_replace(next);
            }
            for effect in effects {
                if let Some(follow_up) = self.apply(effect) {
                    pending.push_back(follow_up);
                }
            }
        }
    }

    fn apply(&mut self, effect: Effect) -> Option<SessionEvent> {
        match effect {
            Effect::AcquireMicrophone => match self.capture.acquire() {
                Ok(()) => Some(SessionEvent::MicrophoneReady),
                Err(e) => {
                    let message = e.to_string();
                    self.connect_failure = Some(VoiceError::Microphone(e));
                    Some(SessionEvent::MicrophoneFailed(message))
                }
            },
            Effect::OpenChannel => {
                if self.channel.is_none() {
                    let handle = self
                        .connector
                        .open(&self.request, self.options.outbound_queue_frames);
                    self.channel = Some(handle);
                }
                None
            }
            Effect::StartCapture => self.start_capture(),
            Effect::ScheduleAudio(payload) => {
                // Nothing decoded after teardown may reach the timeline.
                if self.state != SessionState::Connected || self.channel.is_none() {
                    trace!("Discarding audio received outside a live session");
                    return None;
                }
                let buffer = match self.options.codec.decode_payload(
                    &payload,
                    self.options.output_sample_rate,
                    self.options.output_channels,
                ) {
                    Ok(buffer) => buffer,
                    Err(e) => {
                        warn!("Rejected inbound audio: {}", e);
                        self.app.record_payload_rejected();
                        return None;
                    }
                };
                match self.playback.enqueue(buffer) {
                    Ok(segment) => {
                        self.app.record_segment_scheduled();
                        trace!(
                            "Scheduled segment {} at {:.3}s",
                            segment.id,
                            segment.start_time
                        );
                    }
                    Err(e) => {
                        warn!("Could not schedule response audio: {}", e);
                        self.app.record_payload_rejected();
                    }
                }
                None
            }
            Effect::StopCapture => {
                self.capture.stop();
                None
            }
            Effect::StopPlayback => {
                self.playback.stop_all();
                None
            }
            Effect::ReleaseMicrophone => {
                self.capture.release();
                None
            }
            Effect::CloseChannel => {
                if let Some(channel) = self.channel.as_mut() {
                    channel.close();
                }
                None
            }
            Effect::ClearSession => {
                self.channel = None;
                None
            }
            Effect::ReportError(message) => {
                error!("Voice session failed: {}", message);
                self.app.record_session_failed();
                self.last_error = Some(message);
                None
            }
        }
    }

    fn start_capture(&mut self) -> Option<SessionEvent> {
        let queue = self.channel.as_ref()?.input_queue();
        let codec = self.options.codec;
        let app = self.app.clone();

        let started = self.capture.start(move |frame| {
            let payload = codec.encode(frame);
            match queue.push(payload) {
                PushOutcome::Accepted => app.record_frame_sent(false),
                PushOutcome::DroppedOldest => {
                    app.record_frame_sent(true);
                    trace!("Outbound queue full, dropped oldest frame");
                }
                PushOutcome::Closed => {}
            }
        });

        match started {
            Ok(()) => None,
            Err(e) => Some(SessionEvent::MicrophoneFailed(e.to_string())),
        }
    }

    fn channel_event(&mut self, event: Option<ChannelEvent>) {
        match event {
            Some(ChannelEvent::Opened) => self.handle(SessionEvent::ChannelOpened),
            Some(ChannelEvent::Audio(payload)) => self.handle(SessionEvent::AudioReceived(payload)),
            Some(ChannelEvent::Control(control)) => self.control_event(control),
            Some(ChannelEvent::Closed(reason)) => self.handle(SessionEvent::ChannelClosed(reason)),
            Some(ChannelEvent::Error(message)) => self.handle(SessionEvent::ChannelFailed(message)),
            None => self.handle(SessionEvent::ChannelClosed(None)),
        }
    }

    fn control_event(&mut self, control: ControlEvent) {
        if self.state != SessionState::Connected {
            return;
        }
        match control {
            ControlEvent::TurnComplete => debug!("Model turn complete"),
            ControlEvent::Interrupted => {
                // The remote dropped the rest of its turn; so does the speaker.
                self.app.record_interruption();
                self.playback.stop_all();
                debug!("Model interrupted, playback cleared");
            }
            ControlEvent::GoAway => info!("Remote announced it will close the session"),
        }
    }

    /// Wait for the next channel or playback event and apply it. Returns
    /// false when there is no channel to wait on.
    pub async fn step(&mut self) -> bool {
        let Some(channel) = self.channel.as_mut() else {
            return false;
        };
        let playback = &mut self.playback;

        let incoming = tokio::select! {
            event = channel.next_event() => Incoming::Channel(event),
            Some(id) = playback.next_ended() => Incoming::PlaybackEnded(id),
        };

        match incoming {
            Incoming::Channel(event) => self.channel_event(event),
            Incoming::PlaybackEnded(id) => {
                self.playback.segment_ended(id);
            }
        }
        true
    }

    /// Drive the session until it returns to IDLE or `shutdown` resolves, in
    /// which case the session is disconnected first. `on_change` sees the
    /// controller after every state change.
    pub async fn run_until<F, H>(&mut self, shutdown: F, mut on_change: H)
    where
        F: Future<Output = ()>,
        H: FnMut(&SessionController),
    {
        tokio::pin!(shutdown);
        let mut last = self.state;
        while self.state.is_active() {
            let finished = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, ending voice session");
                    self.disconnect();
                    true
                }
                progressed = self.step() => {
                    if !progressed {
                        self.disconnect();
                    }
                    !progressed
                }
            };
            if self.state != last {
                last = self.state;
                on_change(self);
            }
            if finished {
                break;
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Status indicator updates (disconnected / connecting / connected).
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.status.subscribe()
    }

    /// True only while CONNECTED with a live channel.
    pub fn has_session(&self) -> bool {
        self.state == SessionState::Connected && self.channel.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// How the most recent session ended: `Ok` for a clean disconnect.
    pub fn outcome(&self) -> Result<(), VoiceError> {
        match &self.last_error {
            Some(message) => Err(VoiceError::Session(message.clone())),
            None => Ok(()),
        }
    }

    pub fn live_segments(&self) -> Vec<PlaybackSegment> {
        self.playback.live_segments().cloned().collect()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_running()
    }

    pub fn microphone_held(&self) -> bool {
        self.capture.is_acquired()
    }

    pub fn frames_captured(&self) -> u64 {
        self.capture.frames_delivered()
    }

    pub fn playback_clock(&self) -> f64 {
        self.playback.current_time()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.disconnect();
        self.playback.close();
    }
}
