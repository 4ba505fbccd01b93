//! # Voice Session Module
//!
//! Full-duplex voice conversation with a remote model: microphone frames go
//! up the channel while response audio comes back and is played gaplessly.
//!
//! ## Key Components:
//! - **state**: pure lifecycle state machine (IDLE → CONNECTING → CONNECTED)
//! - **channel**: the transport contract and the bounded outbound queue
//! - **live**: websocket implementation of the channel
//! - **controller**: owns capture, playback, and channel for one session

pub mod channel;
pub mod controller;
pub mod live;
pub mod state;

use crate::audio::capture::CaptureError;
use thiserror::Error;

pub use channel::{ChannelConnector, ChannelEvent, ConnectRequest, ControlEvent};
pub use controller::SessionController;
pub use state::{SessionEvent, SessionState};

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("a voice session is already {0}")]
    AlreadyActive(SessionState),

    #[error(transparent)]
    Microphone(#[from] CaptureError),

    #[error("voice session ended with an error: {0}")]
    Session(String),

    #[error("no API key configured for the voice service")]
    MissingApiKey,
}
