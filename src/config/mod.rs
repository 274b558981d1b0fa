//! Configuration management for chara-voice
//!
//! Values resolve in order: environment, then the TOML file, then defaults.
//! Command-line flags are applied on top by the binary.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::chat::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use crate::{Error, Result};

use file::CharaConfigFile;

/// Default OpenAI-compatible API base URL
pub const DEFAULT_CHAT_URL: &str = "https://api.openai.com/v1";

/// Default VOICEVOX engine URL
pub const DEFAULT_VOICEVOX_URL: &str = "http://localhost:50021";

/// Default VOICEVOX speaker (ずんだもん ノーマル)
pub const DEFAULT_SPEAKER: u32 = 3;

/// Default transcription model
pub const DEFAULT_STT_MODEL: &str = "whisper-1";

/// Default recognition language
pub const DEFAULT_LANGUAGE: &str = "ja";

/// Persona used when none is configured
pub const DEFAULT_CHARACTER: &str = "あなたは「ずんだもん」という名前の、ずんだ餅の妖精です。\
一人称は「ボク」で、語尾には「なのだ」をつけて話します。\
明るく親しみやすい口調で、返答は音声で読み上げられるため二、三文の短い話し言葉にしてください。";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LISTEN_TIMEOUT_SECS: u64 = 10;

/// chara-voice configuration
#[derive(Debug)]
pub struct Config {
    /// Chat completion settings
    pub chat: ChatConfig,

    /// VOICEVOX engine settings
    pub voicevox: VoicevoxConfig,

    /// Speech-to-text settings
    pub stt: SttConfig,

    /// Persona text sent as the first turn of every request
    pub character: String,

    /// Carry previous exchanges into each request
    pub history: bool,

    /// API keys
    pub api_keys: ApiKeys,

    /// Per-request HTTP timeout
    pub request_timeout: Duration,

    /// How long the microphone waits for speech before giving up
    pub listen_timeout: Duration,

    /// Write synthesized audio here instead of playing it
    pub output_dir: Option<PathBuf>,
}

/// Chat completion settings
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub base_url: Url,
    pub model: String,
    pub max_tokens: u32,
}

/// VOICEVOX engine settings
#[derive(Debug, Clone)]
pub struct VoicevoxConfig {
    pub base_url: Url,
    pub speaker: u32,
}

/// Speech-to-text settings
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub base_url: Url,
    pub model: String,
    pub language: String,
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (chat and Whisper)
    pub openai: Option<SecretString>,
}

impl ApiKeys {
    /// Fresh copy of the `OpenAI` key, if one is configured
    #[must_use]
    pub fn openai(&self) -> Option<SecretString> {
        self.openai
            .as_ref()
            .map(|k| SecretString::from(k.expose_secret().to_owned()))
    }
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a URL is invalid or the character file cannot be read
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with values from `env`
    ///
    /// # Errors
    ///
    /// Returns error if a URL or number is invalid, or the character file
    /// cannot be read
    pub fn resolve<F>(fc: CharaConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from),
        };

        // Chat (env > toml > default)
        let chat_url = parse_url(
            "chat base URL",
            &env("CHARA_CHAT_URL")
                .or(fc.chat.base_url)
                .unwrap_or_else(|| DEFAULT_CHAT_URL.to_string()),
        )?;
        let chat = ChatConfig {
            base_url: chat_url.clone(),
            model: env("CHARA_CHAT_MODEL")
                .or(fc.chat.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: parse_env(&env, "CHARA_MAX_TOKENS")?
                .or(fc.chat.max_tokens)
                .unwrap_or(DEFAULT_MAX_TOKENS),
        };

        // VOICEVOX (env > toml > default)
        let voicevox = VoicevoxConfig {
            base_url: parse_url(
                "VOICEVOX URL",
                &env("VOICEVOX_URL")
                    .or(fc.voicevox.base_url)
                    .unwrap_or_else(|| DEFAULT_VOICEVOX_URL.to_string()),
            )?,
            speaker: parse_env(&env, "CHARA_SPEAKER")?
                .or(fc.voicevox.speaker)
                .unwrap_or(DEFAULT_SPEAKER),
        };

        // STT shares the chat endpoint unless told otherwise
        let stt_url = match env("CHARA_STT_URL").or(fc.stt.base_url) {
            Some(raw) => parse_url("STT base URL", &raw)?,
            None => chat_url,
        };
        let stt = SttConfig {
            base_url: stt_url,
            model: env("CHARA_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| DEFAULT_STT_MODEL.to_string()),
            language: env("CHARA_LANGUAGE")
                .or(fc.stt.language)
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        };

        // Character: inline text wins over a file
        let character = match env("CHARA_CHARACTER").or(fc.character.description) {
            Some(text) => text,
            None => match env("CHARA_CHARACTER_FILE").or(fc.character.description_file) {
                Some(path) => read_character_file(&path)?,
                None => DEFAULT_CHARACTER.to_string(),
            },
        };
        if character.trim().is_empty() {
            return Err(Error::Config("character description is empty".to_string()));
        }

        let history = env("CHARA_HISTORY")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .or(fc.conversation.history)
            .unwrap_or(true);

        let request_timeout = Duration::from_secs(
            parse_env(&env, "CHARA_TIMEOUT_SECS")?
                .or(fc.timeouts.request_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        );
        let listen_timeout = Duration::from_secs(
            parse_env(&env, "CHARA_LISTEN_SECS")?
                .or(fc.timeouts.listen_secs)
                .unwrap_or(DEFAULT_LISTEN_TIMEOUT_SECS),
        );

        let output_dir = env("CHARA_OUTPUT_DIR")
            .or(fc.output_dir)
            .map(PathBuf::from);

        Ok(Self {
            chat,
            voicevox,
            stt,
            character,
            history,
            api_keys,
            request_timeout,
            listen_timeout,
            output_dir,
        })
    }
}

/// Build the shared HTTP client used by every service adapter
///
/// # Errors
///
/// Returns error if the TLS backend cannot be initialized
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))
}

/// Append `path` to a base URL without dropping the base's last segment
#[must_use]
pub fn endpoint(base: &Url, path: &str) -> String {
    format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Where replies are written when there is no speaker output
#[must_use]
pub fn default_output_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("chara-replies"),
        |d| d.data_dir().join("chara").join("replies"),
    )
}

fn parse_url(what: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::Config(format!("invalid {what} '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "{what} must use http or https, got '{}'",
            url.scheme()
        )));
    }
    Ok(url)
}

fn parse_env<T, F>(env: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| Error::Config(format!("{key} has an invalid value '{raw}'")))
        })
        .transpose()
}

fn read_character_file(path: &str) -> Result<String> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| Error::Config(format!("failed to read character file '{path}': {e}")))
}
