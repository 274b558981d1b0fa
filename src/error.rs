//! Error types for chara-voice

use std::fmt;

use thiserror::Error;

/// Result type alias for chara-voice operations
pub type Result<T> = std::result::Result<T, Error>;

/// External collaborator a request was addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Chat completion endpoint
    Chat,
    /// VOICEVOX audio-query endpoint
    AudioQuery,
    /// VOICEVOX synthesis endpoint
    Synthesis,
    /// Speech-to-text endpoint
    Transcription,
    /// VOICEVOX version endpoint
    Engine,
}

impl Service {
    /// Stable lowercase name used in logs and messages
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::AudioQuery => "audio_query",
            Self::Synthesis => "synthesis",
            Self::Transcription => "transcription",
            Self::Engine => "engine",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad failure class, for callers that only need to know who is to blame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network unreachable, DNS failure, connection reset, timeout
    Transport,
    /// Upstream answered with a non-success status or an unusable body
    Upstream,
    /// No usable input (nothing heard, blank text)
    Input,
    /// Local failure (configuration, audio device, filesystem)
    Local,
}

/// Errors that can occur in chara-voice
#[derive(Debug, Error)]
pub enum Error {
    /// Request never produced a response
    #[error("{service} request failed: {source}")]
    Transport {
        service: Service,
        #[source]
        source: reqwest::Error,
    },

    /// Upstream returned an error status or a malformed body
    #[error("{service} error{}: {message}", status_suffix(.status))]
    Upstream {
        service: Service,
        status: Option<u16>,
        message: String,
    },

    /// Speech recognition produced no usable transcript
    #[error("no speech detected")]
    NoSpeech,

    /// Text input was empty
    #[error("input text is empty")]
    EmptyInput,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or codec error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[allow(clippy::ref_option)]
fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" {s}")).unwrap_or_default()
}

impl Error {
    /// Wrap a `reqwest` error raised while talking to `service`
    ///
    /// Body decoding failures are reported as upstream errors since the
    /// response did arrive.
    #[must_use]
    pub fn http(service: Service, source: reqwest::Error) -> Self {
        if source.is_decode() {
            return Self::Upstream {
                service,
                status: source.status().map(|s| s.as_u16()),
                message: source.to_string(),
            };
        }
        Self::Transport { service, source }
    }

    /// Upstream error for a well-formed response missing the expected shape
    #[must_use]
    pub fn malformed(service: Service, message: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            status: None,
            message: message.into(),
        }
    }

    /// Classify this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Upstream { .. } | Self::Serialization(_) => ErrorKind::Upstream,
            Self::NoSpeech | Self::EmptyInput => ErrorKind::Input,
            Self::Config(_) | Self::Audio(_) | Self::Io(_) | Self::Toml(_) => ErrorKind::Local,
        }
    }

    /// Collaborator that failed, if the error came from a remote service
    #[must_use]
    pub const fn service(&self) -> Option<Service> {
        match self {
            Self::Transport { service, .. } | Self::Upstream { service, .. } => Some(*service),
            _ => None,
        }
    }
}
