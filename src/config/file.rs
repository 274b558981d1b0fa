//! TOML configuration file loading
//!
//! Supports `~/.config/chara/config.toml` as a persistent config source.
//! All fields are optional: the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CharaConfigFile {
    /// Chat completion settings
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// VOICEVOX engine settings
    #[serde(default)]
    pub voicevox: VoicevoxFileConfig,

    /// Speech-to-text settings
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Character persona
    #[serde(default)]
    pub character: CharacterFileConfig,

    /// Conversation behavior
    #[serde(default)]
    pub conversation: ConversationFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Network and listening timeouts
    #[serde(default)]
    pub timeouts: TimeoutsFileConfig,

    /// Write synthesized audio here instead of playing it
    pub output_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// OpenAI-compatible API base URL (e.g. "https://api.openai.com/v1")
    pub base_url: Option<String>,

    /// Model identifier (e.g. "gpt-3.5-turbo")
    pub model: Option<String>,

    /// Reply length cap
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VoicevoxFileConfig {
    /// Engine URL (e.g. "http://localhost:50021")
    pub base_url: Option<String>,

    /// Speaker (style) id
    pub speaker: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// OpenAI-compatible API base URL, defaults to the chat base URL
    pub base_url: Option<String>,

    /// Transcription model (e.g. "whisper-1")
    pub model: Option<String>,

    /// Recognition language (ISO-639-1)
    pub language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CharacterFileConfig {
    /// Inline persona text
    pub description: Option<String>,

    /// Path to a file holding the persona text
    pub description_file: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    /// Carry previous exchanges into each request
    pub history: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TimeoutsFileConfig {
    /// Per-request HTTP timeout
    pub request_secs: Option<u64>,

    /// How long the microphone waits for speech
    pub listen_secs: Option<u64>,
}

impl CharaConfigFile {
    /// Parse a config file body
    ///
    /// # Errors
    ///
    /// Returns error if the TOML is invalid or has unknown keys
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Load the TOML config file from `CHARA_CONFIG` or the standard path
///
/// Returns `CharaConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> CharaConfigFile {
    let path = std::env::var("CHARA_CONFIG")
        .ok()
        .map(PathBuf::from)
        .or_else(config_file_path);

    let Some(path) = path else {
        return CharaConfigFile::default();
    };

    load_from_path(&path)
}

/// Load a config file, falling back to defaults on any failure
#[must_use]
pub fn load_from_path(path: &Path) -> CharaConfigFile {
    if !path.exists() {
        return CharaConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match CharaConfigFile::parse(&content) {
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
                CharaConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            CharaConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/chara/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("chara").join("config.toml"))
}
