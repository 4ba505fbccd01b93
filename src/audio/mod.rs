//! # Audio Module
//!
//! Everything between the sound devices and the voice channel.
//!
//! ## Key Components:
//! - **codec**: f32 frames to base64 PCM16 and back
//! - **capture**: microphone acquisition and fixed-size frame delivery
//! - **playback**: gapless scheduling of response audio on the output clock
//! - **resample**: rubato sample rate conversion (feature `device-audio`)
//! - **device**: cpal microphone and speaker (feature `device-audio`)
//!
//! ## Audio Format:
//! - **Uplink**: 16 kHz mono, 16-bit little-endian PCM
//! - **Downlink**: 24 kHz, 16-bit little-endian PCM, interleaved when multi-channel

pub mod capture;
pub mod codec;
pub mod playback;

#[cfg(feature = "device-audio")]
pub mod device;
#[cfg(feature = "device-audio")]
pub mod resample;

pub use capture::{CaptureError, CapturePipeline, MicrophoneSource};
pub use codec::{AudioCodec, EncodedPayload, OverflowPolicy, PcmBuffer};
pub use playback::{AudioOutput, PlaybackScheduler};
