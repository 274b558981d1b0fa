//! VOICEVOX synthesis client
//!
//! Rendering speech takes two requests: `audio_query` turns text into a
//! synthesis query, and `synthesis` renders that query to WAV.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{self, Config};
use crate::error::Service;
use crate::{Error, Result};

/// Synthesis query returned by the engine
///
/// Forwarded verbatim to the synthesis endpoint; its fields are never
/// inspected here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioQuery(serde_json::Value);

impl AudioQuery {
    #[must_use]
    pub const fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

/// Renders reply text to audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Build a synthesis query for `text`
    ///
    /// # Errors
    ///
    /// Returns error if the engine is unreachable or rejects the text
    async fn audio_query(&self, text: &str) -> Result<AudioQuery>;

    /// Render a synthesis query to audio bytes
    ///
    /// # Errors
    ///
    /// Returns error if the engine is unreachable or rejects the query
    async fn synthesize(&self, query: &AudioQuery) -> Result<Vec<u8>>;
}

/// HTTP client for a VOICEVOX engine
pub struct VoicevoxClient {
    client: reqwest::Client,
    base_url: Url,
    speaker: u32,
}

impl VoicevoxClient {
    /// Create a client speaking as `speaker`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: Url, speaker: u32, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: config::http_client(timeout)?,
            base_url,
            speaker,
        })
    }

    /// Create a client from loaded configuration
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.voicevox.base_url.clone(),
            config.voicevox.speaker,
            config.request_timeout,
        )
    }

    #[must_use]
    pub const fn speaker(&self) -> u32 {
        self.speaker
    }

    /// Query the engine version, used as a reachability check
    ///
    /// # Errors
    ///
    /// Returns error if the engine is unreachable
    pub async fn version(&self) -> Result<String> {
        let response = self
            .client
            .get(config::endpoint(&self.base_url, "version"))
            .send()
            .await
            .map_err(|e| Error::http(Service::Engine, e))?;

        let response = check_status(Service::Engine, response).await?;
        let version: String = response
            .json()
            .await
            .map_err(|e| Error::http(Service::Engine, e))?;
        Ok(version)
    }
}

#[async_trait]
impl SpeechSynthesizer for VoicevoxClient {
    async fn audio_query(&self, text: &str) -> Result<AudioQuery> {
        tracing::debug!(speaker = self.speaker, text_len = text.len(), "requesting audio query");

        // Query-string values are percent-encoded by reqwest
        let speaker = self.speaker.to_string();
        let response = self
            .client
            .post(config::endpoint(&self.base_url, "audio_query"))
            .query(&[("speaker", speaker.as_str()), ("text", text)])
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "audio query request failed");
                Error::http(Service::AudioQuery, e)
            })?;

        let response = check_status(Service::AudioQuery, response).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::http(Service::AudioQuery, e))?;
        let value: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
            Error::malformed(Service::AudioQuery, format!("audio query is not JSON: {e}"))
        })?;

        Ok(AudioQuery(value))
    }

    async fn synthesize(&self, query: &AudioQuery) -> Result<Vec<u8>> {
        tracing::debug!(speaker = self.speaker, "requesting synthesis");

        let response = self
            .client
            .post(config::endpoint(&self.base_url, "synthesis"))
            .query(&[("speaker", self.speaker)])
            .json(query)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "synthesis request failed");
                Error::http(Service::Synthesis, e)
            })?;

        let response = check_status(Service::Synthesis, response).await?;
        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::http(Service::Synthesis, e))?;

        if audio.is_empty() {
            return Err(Error::malformed(Service::Synthesis, "empty audio payload"));
        }

        tracing::debug!(audio_bytes = audio.len(), "synthesis complete");
        Ok(audio.to_vec())
    }
}

/// Turn a non-success response into an upstream error carrying its body
async fn check_status(service: Service, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(%service, status = %status, body = %body, "VOICEVOX API error");
    Err(Error::Upstream {
        service,
        status: Some(status.as_u16()),
        message: body,
    })
}
