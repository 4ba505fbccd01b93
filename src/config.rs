//! # Configuration Management
//!
//! Loads application settings from layered sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: derive-based conversion between the structs and any format
//!   the `config` crate reads
//! - **Builder pattern**: each source is added in priority order and the last
//!   one to set a key wins
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `GEMINI_API_KEY` / `API_KEY` (credential only)
//! 2. Environment variables (`APP_AUDIO__FRAME_SIZE=2048`, `APP_VOICE__VOICE_NAME=Puck`)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::audio::codec::{OverflowPolicy, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::audio::capture::DEFAULT_FRAME_SIZE;
use crate::voice::channel::ConnectRequest;
use crate::voice::live::DEFAULT_LIVE_ENDPOINT;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_VOICE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_CHAT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_CHAT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const DEFAULT_VOICE_INSTRUCTION: &str = "Você é o assistente de voz do Prosterite. Fale português do Brasil. Seja curto e amigável. Se falarem de preço, mencione os 10% de desconto no Pix ou Cartão.";

pub const DEFAULT_CHAT_PERSONA: &str = "Você é um atendente de suporte via WhatsApp do produto \"Prosterite\" (suplemento para próstata). Seja breve, use emojis e seja muito atencioso. Se o usuário perguntar onde comprar, diga que é pelo botão \"Comprar\" no topo do app e ENFATIZE que há 10% DE DESCONTO pagando no Pix ou Cartão de Crédito.";

/// Main application configuration.
///
/// Grouped by concern so each component only needs to borrow its own
/// section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub voice: VoiceConfig,
    pub audio: AudioConfig,
    pub chat: ChatConfig,
    pub storage: StorageConfig,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Credential for both the realtime and the text endpoints.
    pub key: String,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let key = if self.key.is_empty() { "<unset>" } else { "<redacted>" };
        f.debug_struct("ApiConfig").field("key", &key).finish()
    }
}

/// Realtime voice session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub endpoint: String,
    pub model: String,
    pub voice_name: String,
    pub response_modality: String,
    pub system_instruction: String,
}

/// Audio format and buffering.
///
/// ## Fields:
/// - `input_sample_rate`: rate microphone frames are encoded at (16 kHz)
/// - `output_sample_rate`: fallback rate for response audio without a
///   `rate=` in its MIME type (24 kHz)
/// - `channels`: channel count of response audio (mono)
/// - `frame_size`: samples per captured frame
/// - `outbound_queue_frames`: frames buffered toward the channel before the
///   oldest is dropped
/// - `overflow_policy`: `clamp` or `wrap` for out-of-range samples
/// - `input_device` / `output_device`: device names, empty for the default
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub channels: usize,
    pub frame_size: usize,
    pub outbound_queue_frames: usize,
    pub overflow_policy: OverflowPolicy,
    pub input_device: String,
    pub output_device: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub endpoint: String,
    pub model: String,
    /// Prompt preamble placed before every user message.
    pub persona: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            voice: VoiceConfig {
                endpoint: DEFAULT_LIVE_ENDPOINT.to_string(),
                model: DEFAULT_VOICE_MODEL.to_string(),
                voice_name: "Kore".to_string(),
                response_modality: "AUDIO".to_string(),
                system_instruction: DEFAULT_VOICE_INSTRUCTION.to_string(),
            },
            audio: AudioConfig {
                input_sample_rate: INPUT_SAMPLE_RATE,
                output_sample_rate: OUTPUT_SAMPLE_RATE,
                channels: 1,
                frame_size: DEFAULT_FRAME_SIZE,
                outbound_queue_frames: 32, // ~8s of 16 kHz audio at 4096 samples per frame
                overflow_policy: OverflowPolicy::Clamp,
                input_device: String::new(),
                output_device: String::new(),
            },
            chat: ChatConfig {
                endpoint: DEFAULT_CHAT_ENDPOINT.to_string(),
                model: DEFAULT_CHAT_MODEL.to_string(),
                persona: DEFAULT_CHAT_PERSONA.to_string(),
                request_timeout_secs: 30,
            },
            storage: StorageConfig {
                data_dir: "data".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml`, and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_VOICE__MODEL=...`: override the realtime model
    /// - `APP_AUDIO__OVERFLOW_POLICY=wrap`: keep raw wraparound quantization
    /// - `APP_STORAGE__DATA_DIR=/var/lib/regimen`: move persisted records
    /// - `GEMINI_API_KEY=...`: credential, also accepted as `API_KEY`
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Same as [`AppConfig::load`] with an explicit config file stem.
    pub fn load_from(file_stem: &str) -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name(file_stem).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Credentials usually arrive under their conventional names.
        if let Some(key) = env::var("GEMINI_API_KEY")
            .ok()
            .or_else(|| env::var("API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
        {
            settings = settings.set_override("api.key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check that the values make sense before anything is opened.
    pub fn validate(&self) -> Result<()> {
        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be greater than 0"));
        }

        if self.audio.channels != 1 {
            return Err(anyhow::anyhow!(
                "Only mono response audio is supported (got {} channels)",
                self.audio.channels
            ));
        }

        if self.audio.frame_size == 0 {
            return Err(anyhow::anyhow!("Audio frame size must be greater than 0"));
        }

        if self.audio.outbound_queue_frames == 0 {
            return Err(anyhow::anyhow!("Outbound queue must hold at least one frame"));
        }

        if self.voice.model.trim().is_empty() || self.chat.model.trim().is_empty() {
            return Err(anyhow::anyhow!("Model identifiers cannot be empty"));
        }

        if self.chat.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Chat request timeout must be greater than 0"));
        }

        Ok(())
    }

    /// Session parameters for the realtime channel.
    pub fn connect_request(&self) -> ConnectRequest {
        ConnectRequest {
            model: self.voice.model.clone(),
            response_modality: self.voice.response_modality.clone(),
            voice_name: self.voice.voice_name.clone(),
            system_instruction: self.voice.system_instruction.clone(),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.audio.input_sample_rate, 16_000);
        assert_eq!(config.audio.output_sample_rate, 24_000);
        assert_eq!(config.audio.frame_size, 4096);
        assert_eq!(config.audio.overflow_policy, OverflowPolicy::Clamp);
        assert_eq!(config.voice.voice_name, "Kore");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.audio.frame_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.channels = 2;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.voice.model = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regimen.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[audio]\nframe_size = 2048\noverflow_policy = \"wrap\"\n\n[voice]\nvoice_name = \"Puck\""
        )
        .unwrap();

        let stem = dir.path().join("regimen");
        let config = AppConfig::load_from(stem.to_str().unwrap()).unwrap();
        assert_eq!(config.audio.frame_size, 2048);
        assert_eq!(config.audio.overflow_policy, OverflowPolicy::Wrap);
        assert_eq!(config.voice.voice_name, "Puck");
        // Untouched keys keep their defaults
        assert_eq!(config.audio.input_sample_rate, 16_000);
        assert_eq!(config.chat.model, DEFAULT_CHAT_MODEL);
    }

    #[test]
    fn test_connect_request_from_voice_section() {
        let config = AppConfig::default();
        let request = config.connect_request();
        assert_eq!(request.model, DEFAULT_VOICE_MODEL);
        assert_eq!(request.response_modality, "AUDIO");
        assert!(request.system_instruction.contains("Prosterite"));
    }

    #[test]
    fn test_api_key_is_not_printed() {
        let api = ApiConfig {
            key: "secret".to_string(),
        };
        assert!(!format!("{:?}", api).contains("secret"));
    }
}
