//! # Voice Session State Machine
//!
//! Pure transition function for the voice session lifecycle. It decides the
//! next state and the list of side effects to run; the controller executes
//! the effects against the real microphone, speaker, and channel.
//!
//! ```text
//!            Connect                ChannelOpened
//!   IDLE ─────────────► CONNECTING ───────────────► CONNECTED
//!    ▲                       │                          │
//!    └───────────────────────┴──────────────────────────┘
//!       Disconnect / ChannelClosed / ChannelFailed / MicrophoneFailed
//! ```
//!
//! Every exit to IDLE carries the same teardown effect list, so a user
//! disconnect, a remote close, and a transport error release exactly the
//! same resources.

use crate::audio::codec::EncodedPayload;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        }
    }

    /// Label for the user-facing status indicator.
    pub fn indicator(&self) -> &'static str {
        match self {
            SessionState::Idle => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// User asked to start talking.
    Connect,
    MicrophoneReady,
    MicrophoneFailed(String),
    ChannelOpened,
    AudioReceived(EncodedPayload),
    ChannelClosed(Option<String>),
    ChannelFailed(String),
    /// User asked to stop, or the owner is going away.
    Disconnect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    AcquireMicrophone,
    OpenChannel,
    StartCapture,
    ScheduleAudio(EncodedPayload),
    StopCapture,
    StopPlayback,
    ReleaseMicrophone,
    CloseChannel,
    ClearSession,
    ReportError(String),
}

/// Effects run on every transition back to IDLE, in order.
pub fn teardown_effects() -> Vec<Effect> {
    vec![
        Effect::StopCapture,
        Effect::ReleaseMicrophone,
        Effect::StopPlayback,
        Effect::CloseChannel,
        Effect::ClearSession,
    ]
}

fn teardown_with_error(message: String) -> Vec<Effect> {
    let mut effects = teardown_effects();
    effects.push(Effect::ReportError(message));
    effects
}

/// Compute the next state and effects. Events that make no sense in the
/// current state are ignored.
pub fn transition(state: SessionState, event: SessionEvent) -> (SessionState, Vec<Effect>) {
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        (S::Idle, E::Connect) => (S::Connecting, vec![Effect::AcquireMicrophone]),
        // A second connect while a session exists is a no-op.
        (S::Connecting | S::Connected, E::Connect) => (state, Vec::new()),

        (S::Connecting, E::MicrophoneReady) => (S::Connecting, vec![Effect::OpenChannel]),
        (S::Connecting, E::ChannelOpened) => (S::Connected, vec![Effect::StartCapture]),
        (S::Connected, E::AudioReceived(payload)) => {
            (S::Connected, vec![Effect::ScheduleAudio(payload)])
        }

        (S::Connecting | S::Connected, E::Disconnect) => (S::Idle, teardown_effects()),
        (S::Connecting | S::Connected, E::ChannelClosed(None)) => (S::Idle, teardown_effects()),
        (S::Connecting | S::Connected, E::ChannelClosed(Some(reason))) => {
            (S::Idle, teardown_with_error(format!("channel closed: {}", reason)))
        }
        (S::Connecting | S::Connected, E::ChannelFailed(message)) => {
            (S::Idle, teardown_with_error(message))
        }
        (S::Connecting | S::Connected, E::MicrophoneFailed(message)) => {
            (S::Idle, teardown_with_error(message))
        }

        (state, _) => (state, Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::pcm_mime_type;

    fn audio() -> EncodedPayload {
        EncodedPayload {
            data: "AAA=".to_string(),
            mime_type: pcm_mime_type(24_000),
        }
    }

    #[test]
    fn test_happy_path() {
        let (s, fx) = transition(SessionState::Idle, SessionEvent::Connect);
        assert_eq!((s, fx), (SessionState::Connecting, vec![Effect::AcquireMicrophone]));

        let (s, fx) = transition(s, SessionEvent::MicrophoneReady);
        assert_eq!((s, fx), (SessionState::Connecting, vec![Effect::OpenChannel]));

        let (s, fx) = transition(s, SessionEvent::ChannelOpened);
        assert_eq!((s, fx), (SessionState::Connected, vec![Effect::StartCapture]));

        let (s, fx) = transition(s, SessionEvent::AudioReceived(audio()));
        assert_eq!((s, fx), (SessionState::Connected, vec![Effect::ScheduleAudio(audio())]));

        let (s, fx) = transition(s, SessionEvent::Disconnect);
        assert_eq!((s, fx), (SessionState::Idle, teardown_effects()));
    }

    #[test]
    fn test_every_exit_tears_down() {
        let exits = [
            SessionEvent::Disconnect,
            SessionEvent::ChannelClosed(None),
            SessionEvent::ChannelClosed(Some("going away".to_string())),
            SessionEvent::ChannelFailed("socket reset".to_string()),
            SessionEvent::MicrophoneFailed("denied".to_string()),
        ];
        for from in [SessionState::Connecting, SessionState::Connected] {
            for event in exits.iter().cloned() {
                let (next, effects) = transition(from, event.clone());
                assert_eq!(next, SessionState::Idle, "{:?} from {:?}", event, from);
                assert_eq!(&effects[..5], &teardown_effects()[..], "{:?}", event);
            }
        }
    }

    #[test]
    fn test_failures_are_reported() {
        let (_, effects) = transition(
            SessionState::Connected,
            SessionEvent::ChannelFailed("socket reset".to_string()),
        );
        assert_eq!(effects.last(), Some(&Effect::ReportError("socket reset".to_string())));

        let (_, effects) = transition(SessionState::Connected, SessionEvent::ChannelClosed(None));
        assert!(!effects.iter().any(|e| matches!(e, Effect::ReportError(_))));
    }

    #[test]
    fn test_idle_ignores_everything_but_connect() {
        for event in [
            SessionEvent::Disconnect,
            SessionEvent::ChannelOpened,
            SessionEvent::MicrophoneReady,
            SessionEvent::AudioReceived(audio()),
            SessionEvent::ChannelClosed(None),
            SessionEvent::ChannelFailed("late".to_string()),
        ] {
            let (next, effects) = transition(SessionState::Idle, event);
            assert_eq!(next, SessionState::Idle);
            assert!(effects.is_empty());
        }
    }

    #[test]
    fn test_audio_before_open_is_dropped() {
        let (next, effects) = transition(SessionState::Connecting, SessionEvent::AudioReceived(audio()));
        assert_eq!(next, SessionState::Connecting);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_reentrant_connect_is_noop() {
        for state in [SessionState::Connecting, SessionState::Connected] {
            let (next, effects) = transition(state, SessionEvent::Connect);
            assert_eq!(next, state);
            assert!(effects.is_empty());
        }
    }

    #[test]
    fn test_indicator_labels() {
        assert_eq!(SessionState::Idle.indicator(), "disconnected");
        assert_eq!(SessionState::Connecting.indicator(), "connecting");
        assert_eq!(SessionState::Connected.to_string(), "connected");
    }
}
