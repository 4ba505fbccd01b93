//! # Audio Codec Adapter
//!
//! Converts between the float sample frames the sound devices speak and the
//! 16-bit PCM payloads the remote voice service speaks.
//!
//! ## Wire Format:
//! - **Outbound**: mono f32 in [-1.0, 1.0] → little-endian i16 → base64,
//!   tagged `audio/pcm;rate=16000`
//! - **Inbound**: base64 → little-endian i16 (interleaved when multi-channel)
//!   → f32 divided by 32768, nominally at 24 kHz
//!
//! ## Key Rust Concepts:
//! - **byteorder**: explicit endianness instead of relying on the host CPU
//! - **thiserror**: typed errors for the malformed payload cases
//! - **Copy types**: `AudioCodec` is two small fields, so it is passed by value

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rate the remote expects microphone audio at.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Nominal rate of audio coming back from the remote.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Scale factor between normalized floats and signed 16-bit samples.
pub const PCM_SCALE: f32 = 32_768.0;

const BYTES_PER_SAMPLE: usize = 2;

/// What to do with samples whose scaled value does not fit in an i16.
///
/// `Clamp` saturates at the i16 range. `Wrap` keeps the raw
/// multiply-and-truncate behaviour, so `1.0` comes out as `-32768`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    Clamp,
    Wrap,
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clamp" | "saturate" => Ok(OverflowPolicy::Clamp),
            "wrap" | "wraparound" => Ok(OverflowPolicy::Wrap),
            _ => Err(format!("Unknown overflow policy: {}", s)),
        }
    }
}

/// Base64 audio plus its MIME descriptor, as exchanged with the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedPayload {
    pub data: String,
    pub mime_type: String,
}

impl EncodedPayload {
    /// Encode raw i16 samples at the given rate.
    pub fn from_samples(samples: &[i16], sample_rate: u32) -> Self {
        let mut bytes = vec![0u8; samples.len() * BYTES_PER_SAMPLE];
        LittleEndian::write_i16_into(samples, &mut bytes);
        Self {
            data: B64.encode(&bytes),
            mime_type: pcm_mime_type(sample_rate),
        }
    }

    /// Sample rate declared in the MIME type (`audio/pcm;rate=N`), if any.
    pub fn sample_rate(&self) -> Option<u32> {
        self.mime_type
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.trim().parse().ok())
    }
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Decoded playable audio: one sample vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl PcmBuffer {
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Re-interleave for device callbacks.
    pub fn interleaved(&self) -> Vec<f32> {
        let frames = self.frame_count();
        let mut out = Vec::with_capacity(frames * self.channel_count());
        for frame in 0..frames {
            for channel in &self.channels {
                out.push(channel[frame]);
            }
        }
        out
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload of {len} bytes is not a multiple of the {frame_bytes}-byte frame")]
    MisalignedPayload { len: usize, frame_bytes: usize },

    #[error("payload is not valid base64: {0}")]
    InvalidBase64(String),

    #[error("channel count must be at least 1")]
    NoChannels,

    #[error("sample rate must be greater than 0")]
    InvalidSampleRate,
}

/// Stateless codec between float frames and PCM16 payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioCodec {
    pub input_sample_rate: u32,
    pub overflow: OverflowPolicy,
}

impl Default for AudioCodec {
    fn default() -> Self {
        Self {
            input_sample_rate: INPUT_SAMPLE_RATE,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl AudioCodec {
    pub fn new(input_sample_rate: u32, overflow: OverflowPolicy) -> Self {
        Self {
            input_sample_rate,
            overflow,
        }
    }

    /// Scale one normalized sample into i16 under the configured policy.
    pub fn quantize(&self, sample: f32) -> i16 {
        let scaled = sample * PCM_SCALE;
        match self.overflow {
            OverflowPolicy::Clamp => {
                if scaled.is_nan() {
                    0
                } else {
                    scaled.clamp(-PCM_SCALE, PCM_SCALE - 1.0) as i16
                }
            }
            // Float-to-int `as` saturates, so go through i32 to get the wraparound.
            OverflowPolicy::Wrap => (scaled as i32) as i16,
        }
    }

    /// Encode one captured frame for the remote.
    pub fn encode(&self, samples: &[f32]) -> EncodedPayload {
        let pcm: Vec<i16> = samples.iter().map(|&s| self.quantize(s)).collect();
        EncodedPayload::from_samples(&pcm, self.input_sample_rate)
    }

    /// Decode raw little-endian PCM16 into per-channel float samples.
    ///
    /// Multi-channel input is interleaved. A byte length that is not a whole
    /// number of frames is rejected instead of silently truncated.
    pub fn decode(
        &self,
        bytes: &[u8],
        sample_rate: u32,
        channels: usize,
    ) -> Result<PcmBuffer, CodecError> {
        if channels == 0 {
            return Err(CodecError::NoChannels);
        }
        if sample_rate == 0 {
            return Err(CodecError::InvalidSampleRate);
        }
        let frame_bytes = channels * BYTES_PER_SAMPLE;
        if bytes.len() % frame_bytes != 0 {
            return Err(CodecError::MisalignedPayload {
                len: bytes.len(),
                frame_bytes,
            });
        }

        let mut samples = vec![0i16; bytes.len() / BYTES_PER_SAMPLE];
        LittleEndian::read_i16_into(bytes, &mut samples);

        let frames = samples.len() / channels;
        let mut out = vec![Vec::with_capacity(frames); channels];
        for frame in samples.chunks_exact(channels) {
            for (channel, &sample) in out.iter_mut().zip(frame) {
                channel.push(sample as f32 / PCM_SCALE);
            }
        }

        Ok(PcmBuffer {
            sample_rate,
            channels: out,
        })
    }

    /// Base64-decode a remote payload and decode it. The MIME rate wins over
    /// `default_rate` when present.
    pub fn decode_payload(
        &self,
        payload: &EncodedPayload,
        default_rate: u32,
        channels: usize,
    ) -> Result<PcmBuffer, CodecError> {
        let bytes = B64
            .decode(payload.data.as_bytes())
            .map_err(|e| CodecError::InvalidBase64(e.to_string()))?;
        let rate = payload.sample_rate().unwrap_or(default_rate);
        self.decode(&bytes, rate, channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_tags_input_rate() {
        let payload = AudioCodec::default().encode(&[0.0; 8]);
        assert_eq!(payload.mime_type, "audio/pcm;rate=16000");
        assert_eq!(payload.sample_rate(), Some(16_000));
    }

    #[test]
    fn test_known_values() {
        let codec = AudioCodec::default();
        let payload = codec.encode(&[0.0, 0.5, -0.5, -1.0]);
        let bytes = B64.decode(payload.data).unwrap();
        assert_eq!(bytes, vec![0x00, 0x00, 0x00, 0x40, 0x00, 0xC0, 0x00, 0x80]);
    }

    #[test]
    fn test_roundtrip_within_one_step() {
        let codec = AudioCodec::default();
        let input: Vec<f32> = (0..4096)
            .map(|i| ((i as f32) * 0.01).sin() * 0.9)
            .collect();
        let payload = codec.encode(&input);
        let decoded = codec.decode_payload(&payload, OUTPUT_SAMPLE_RATE, 1).unwrap();

        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.frame_count(), input.len());
        for (a, b) in input.iter().zip(decoded.channel(0).unwrap()) {
            assert!((a - b).abs() <= 1.0 / PCM_SCALE, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_full_scale_positive_clamps_by_default() {
        let codec = AudioCodec::default();
        assert_eq!(codec.quantize(1.0), i16::MAX);
        assert_eq!(codec.quantize(1.5), i16::MAX);
        assert_eq!(codec.quantize(-1.0), i16::MIN);
        assert_eq!(codec.quantize(f32::NAN), 0);
    }

    #[test]
    fn test_full_scale_positive_wraps_when_requested() {
        let codec = AudioCodec::new(INPUT_SAMPLE_RATE, OverflowPolicy::Wrap);
        assert_eq!(codec.quantize(1.0), i16::MIN);
        assert_eq!(codec.quantize(0.25), 8192);
    }

    #[test]
    fn test_decode_rejects_misaligned_length() {
        let codec = AudioCodec::default();
        let err = codec.decode(&[0u8; 7], OUTPUT_SAMPLE_RATE, 1).unwrap_err();
        assert_eq!(err, CodecError::MisalignedPayload { len: 7, frame_bytes: 2 });

        let err = codec.decode(&[0u8; 6], OUTPUT_SAMPLE_RATE, 2).unwrap_err();
        assert_eq!(err, CodecError::MisalignedPayload { len: 6, frame_bytes: 4 });
    }

    #[test]
    fn test_decode_deinterleaves_stereo() {
        let codec = AudioCodec::default();
        let mut bytes = vec![0u8; 8];
        LittleEndian::write_i16_into(&[16384, -16384, 8192, -8192], &mut bytes);
        let buffer = codec.decode(&bytes, 24_000, 2).unwrap();

        assert_eq!(buffer.channel(0).unwrap(), &[0.5, 0.25]);
        assert_eq!(buffer.channel(1).unwrap(), &[-0.5, -0.25]);
        assert_eq!(buffer.interleaved(), vec![0.5, -0.5, 0.25, -0.25]);
    }

    #[test]
    fn test_empty_payload_is_zero_length_buffer() {
        let codec = AudioCodec::default();
        let buffer = codec.decode(&[], OUTPUT_SAMPLE_RATE, 1).unwrap();
        assert_eq!(buffer.frame_count(), 0);
        assert_eq!(buffer.duration(), 0.0);
    }

    #[test]
    fn test_duration_follows_sample_rate() {
        let codec = AudioCodec::default();
        let buffer = codec.decode(&vec![0u8; 48_000], OUTPUT_SAMPLE_RATE, 1).unwrap();
        assert!((buffer.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bad_base64_is_an_error() {
        let codec = AudioCodec::default();
        let payload = EncodedPayload {
            data: "not base64!!".to_string(),
            mime_type: pcm_mime_type(OUTPUT_SAMPLE_RATE),
        };
        assert!(matches!(
            codec.decode_payload(&payload, OUTPUT_SAMPLE_RATE, 1),
            Err(CodecError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_mime_rate_parsing() {
        let payload = EncodedPayload {
            data: String::new(),
            mime_type: "audio/pcm; rate=24000".to_string(),
        };
        assert_eq!(payload.sample_rate(), Some(24_000));

        let bare = EncodedPayload {
            data: String::new(),
            mime_type: "audio/pcm".to_string(),
        };
        assert_eq!(bare.sample_rate(), None);
    }

    #[test]
    fn test_overflow_policy_parsing() {
        assert_eq!("clamp".parse::<OverflowPolicy>().unwrap(), OverflowPolicy::Clamp);
        assert_eq!("WRAP".parse::<OverflowPolicy>().unwrap(), OverflowPolicy::Wrap);
        assert!("round".parse::<OverflowPolicy>().is_err());
    }
}
