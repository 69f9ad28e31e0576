//! TOML configuration file loading
//!
//! Supports `~/.config/talkback/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct TalkbackConfigFile {
    /// Directory holding the local database
    pub data_dir: Option<String>,

    /// Chat completion endpoint configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Fallback credential when none is stored
    pub openai_api_key: Option<String>,
}

/// Chat completion configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// API base URL (e.g. `https://api.openai.com/v1`)
    pub base_url: Option<String>,

    /// Model identifier (e.g. "gpt-3.5-turbo")
    pub model: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable voice input/output
    pub enabled: Option<bool>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// Milliseconds between partial transcriptions; 0 disables them
    pub partial_interval_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `TalkbackConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> TalkbackConfigFile {
    config_file_path().map_or_else(TalkbackConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
#[must_use]
pub fn load_from(path: &Path) -> TalkbackConfigFile {
    if !path.exists() {
        return TalkbackConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                TalkbackConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            TalkbackConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/talkback/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("talkback").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_parses() {
        let fc: TalkbackConfigFile = toml::from_str(
            r#"
            [llm]
            model = "gpt-4o-mini"

            [voice]
            partial_interval_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(fc.llm.model.as_deref(), Some("gpt-4o-mini"));
        assert!(fc.llm.base_url.is_none());
        assert_eq!(fc.voice.partial_interval_ms, Some(0));
        assert!(fc.openai_api_key.is_none());
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let fc = load_from(&dir.path().join("absent.toml"));
        assert!(fc.llm.model.is_none());
    }

    #[test]
    fn unparseable_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[llm\nmodel = ").unwrap();

        let fc = load_from(&path);
        assert!(fc.llm.model.is_none());
    }
}
