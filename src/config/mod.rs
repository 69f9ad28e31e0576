//! Configuration management
//!
//! Each field resolves as environment variable > TOML file > default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::chat::{DEFAULT_BASE_URL, DEFAULT_MODEL};

/// Name of the database file inside the data directory
const DB_FILE: &str = "talkback.db";

/// Talkback configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (database)
    pub data_dir: PathBuf,

    /// Chat completion endpoint
    pub llm: LlmConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Credential used when none is stored locally
    /// Set via `OPENAI_API_KEY`
    pub openai_api_key: Option<SecretString>,
}

/// Chat completion endpoint configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// API base URL, without the `/chat/completions` suffix
    /// Set via `TALKBACK_LLM_BASE_URL`
    pub base_url: String,

    /// Model identifier sent with every request
    /// Set via `TALKBACK_LLM_MODEL`
    pub model: String,

    /// Request timeout
    pub timeout: Duration,
}

/// Voice configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable voice input/output
    pub enabled: bool,

    /// STT model
    pub stt_model: String,

    /// TTS model
    pub tts_model: String,

    /// TTS voice
    pub tts_voice: String,

    /// Interval between partial transcriptions; zero disables them
    pub partial_interval: Duration,
}

impl Config {
    /// Load configuration from the environment and the config file
    #[must_use]
    pub fn load(disable_voice: bool) -> Self {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok(), disable_voice)
    }

    /// Merge a parsed config file with an environment lookup
    #[must_use]
    pub fn from_sources(
        fc: file::TalkbackConfigFile,
        env: impl Fn(&str) -> Option<String>,
        disable_voice: bool,
    ) -> Self {
        let data_dir = env("TALKBACK_DATA_DIR")
            .or(fc.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        let llm = LlmConfig {
            base_url: env("TALKBACK_LLM_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: env("TALKBACK_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout: Duration::from_secs(fc.llm.timeout_secs.unwrap_or(60)),
        };

        let voice_enabled = if disable_voice {
            tracing::info!("voice explicitly disabled via --disable-voice");
            false
        } else {
            fc.voice.enabled.unwrap_or(true)
        };
        let voice = VoiceConfig {
            enabled: voice_enabled,
            stt_model: fc.voice.stt_model.unwrap_or_else(|| "whisper-1".to_string()),
            tts_model: fc.voice.tts_model.unwrap_or_else(|| "tts-1".to_string()),
            tts_voice: fc.voice.tts_voice.unwrap_or_else(|| "alloy".to_string()),
            partial_interval: Duration::from_millis(fc.voice.partial_interval_ms.unwrap_or(1500)),
        };

        let openai_api_key = env("OPENAI_API_KEY")
            .or(fc.openai_api_key)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        Self {
            data_dir,
            llm,
            voice,
            openai_api_key,
        }
    }

    /// Path of the local database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }
}

/// Platform data directory (`~/.local/share/talkback` on Linux)
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from(".talkback"), |d| d.data_dir().join("talkback"))
}
