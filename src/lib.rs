//! # Regimen Companion
//!
//! Treatment companion for a medication regimen: a real-time voice
//! assistant over a bidirectional audio channel, a text support chat, and
//! a local journal of doses and symptoms.
//!
//! ## Application Architecture:
//! - **audio**: codec, microphone capture, and gapless playback
//! - **voice**: session state machine, channel transport, and controller
//! - **chat**: stateless text chat bridge
//! - **store**: JSON persistence of the medication journal
//! - **config**: configuration (TOML files + environment variables)
//! - **state**: shared application state and pipeline counters
//! - **health**: status report
//! - **error**: application error type

pub mod audio;
pub mod chat;
pub mod config;
pub mod error;
pub mod genai;
pub mod health;
pub mod state;
pub mod store;
pub mod voice;

#[cfg(test)]
mod testing;
