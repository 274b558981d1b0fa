//! Speech recognition
//!
//! A recognizer is a single-shot operation: it listens once and either hands
//! back a transcript or reports that nothing usable was heard.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::config::{self, Config};
use crate::error::Service;
use crate::voice::{decode_wav, is_silent};
use crate::{Error, Result};

/// Recognized speech
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    /// Recognized text, trimmed
    pub text: String,

    /// Language the text was recognized in, if known
    pub language: Option<String>,
}

/// Listens once and returns what was said
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Recognize one utterance
    ///
    /// # Errors
    ///
    /// Returns `Error::NoSpeech` if nothing usable was heard, or a transport
    /// or upstream error if transcription fails
    async fn recognize(&self) -> Result<Transcript>;
}

/// Response from the Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes WAV audio through an OpenAI-compatible Whisper endpoint
pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
    model: String,
    language: String,
}

impl WhisperTranscriber {
    /// Create a transcriber for `{base_url}/audio/transcriptions`
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty or the HTTP client cannot be built
    pub fn new(api_key: SecretString, base_url: &Url, timeout: Duration) -> Result<Self> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: config::http_client(timeout)?,
            api_key,
            endpoint: config::endpoint(base_url, "audio/transcriptions"),
            model: config::DEFAULT_STT_MODEL.to_string(),
            language: config::DEFAULT_LANGUAGE.to_string(),
        })
    }

    /// Create a transcriber from loaded configuration
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.api_keys.openai().ok_or_else(|| {
            Error::Config("OPENAI_API_KEY is not set (env or config file)".to_string())
        })?;

        Ok(Self::new(api_key, &config.stt.base_url, config.request_timeout)?
            .with_model(config.stt.model.clone())
            .with_language(config.stt.language.clone()))
    }

    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    #[must_use]
    pub fn with_language(mut self, language: String) -> Self {
        self.language = language;
        self
    }

    /// Transcribe WAV bytes
    ///
    /// # Errors
    ///
    /// Returns `Error::NoSpeech` for an empty transcript, otherwise a
    /// transport or upstream error if the request fails
    pub async fn transcribe(&self, wav: Vec<u8>) -> Result<Transcript> {
        tracing::debug!(audio_bytes = wav.len(), language = %self.language, "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("speech.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::http(Service::Transcription, e))?,
            )
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .text("response_format", "json");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                Error::http(Service::Transcription, e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Upstream {
                service: Service::Transcription,
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| Error::http(Service::Transcription, e))?;

        let text = result.text.trim().to_string();
        if text.is_empty() {
            return Err(Error::NoSpeech);
        }

        tracing::info!(transcript = %text, "transcription complete");
        Ok(Transcript {
            text,
            language: Some(self.language.clone()),
        })
    }
}

/// Recognizes a pre-recorded WAV file
pub struct WavFileRecognizer {
    path: PathBuf,
    transcriber: WhisperTranscriber,
}

impl WavFileRecognizer {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, transcriber: WhisperTranscriber) -> Self {
        Self {
            path: path.into(),
            transcriber,
        }
    }
}

#[async_trait]
impl SpeechRecognizer for WavFileRecognizer {
    async fn recognize(&self) -> Result<Transcript> {
        let wav = tokio::fs::read(&self.path).await?;

        // Skip the round trip for recordings with nothing in them
        let pcm = decode_wav(&wav)?;
        if is_silent(&pcm.samples, pcm.sample_rate) {
            tracing::info!(path = %self.path.display(), "recording is silent");
            return Err(Error::NoSpeech);
        }

        self.transcriber.transcribe(wav).await
    }
}

/// Records one utterance from the default microphone and transcribes it
#[cfg(feature = "audio")]
pub struct MicrophoneRecognizer {
    transcriber: WhisperTranscriber,
    listen_timeout: Duration,
}

#[cfg(feature = "audio")]
impl MicrophoneRecognizer {
    #[must_use]
    pub const fn new(transcriber: WhisperTranscriber, listen_timeout: Duration) -> Self {
        Self {
            transcriber,
            listen_timeout,
        }
    }
}

#[cfg(feature = "audio")]
#[async_trait]
impl SpeechRecognizer for MicrophoneRecognizer {
    async fn recognize(&self) -> Result<Transcript> {
        use crate::voice::{Microphone, SAMPLE_RATE, samples_to_wav};

        let timeout = self.listen_timeout;
        tracing::info!(timeout_secs = timeout.as_secs(), "listening");

        // The capture stream must stay on one thread
        let recording = tokio::task::spawn_blocking(move || {
            let mut microphone = Microphone::open()?;
            microphone.record_utterance(timeout)
        })
        .await
        .map_err(|e| Error::Audio(format!("capture task failed: {e}")))??;

        let Some(samples) = recording else {
            return Err(Error::NoSpeech);
        };

        let wav = samples_to_wav(&samples, SAMPLE_RATE)?;
        self.transcriber.transcribe(wav).await
    }
}
