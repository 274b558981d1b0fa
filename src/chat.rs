//! Chat completion client

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::config::{self, Config};
use crate::conversation::Turn;
use crate::error::Service;
use crate::{Error, Result};

/// Default chat model
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Default cap on reply length
pub const DEFAULT_MAX_TOKENS: u32 = 500;

/// Produces a reply for an ordered message list
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send `messages` and return the reply text
    ///
    /// # Errors
    ///
    /// Returns a transport error if the request cannot be delivered, or an
    /// upstream error if the response carries no reply
    async fn complete(&self, messages: &[Turn]) -> Result<String>;
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [Turn],
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(serde::Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(serde::Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completions client
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiChat {
    /// Create a client for `{base_url}/chat/completions`
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty or the HTTP client cannot be built
    pub fn new(api_key: SecretString, base_url: &Url, timeout: Duration) -> Result<Self> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for chat".to_string(),
            ));
        }

        Ok(Self {
            client: config::http_client(timeout)?,
            api_key,
            endpoint: config::endpoint(base_url, "chat/completions"),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    /// Create a client from loaded configuration
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.api_keys.openai().ok_or_else(|| {
            Error::Config("OPENAI_API_KEY is not set (env or config file)".to_string())
        })?;

        Ok(Self::new(api_key, &config.chat.base_url, config.request_timeout)?
            .with_model(config.chat.model.clone())
            .with_max_tokens(config.chat.max_tokens))
    }

    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    async fn complete(&self, messages: &[Turn]) -> Result<String> {
        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            "requesting chat completion"
        );

        let request = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat request failed");
                Error::http(Service::Chat, e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Upstream {
                service: Service::Chat,
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::http(Service::Chat, e))?;
        let parsed: ChatResponse = serde_json::from_slice(&body).map_err(|e| {
            Error::malformed(Service::Chat, format!("unexpected response body: {e}"))
        })?;

        let reply = extract_reply(parsed)?;
        tracing::debug!(reply_len = reply.len(), "chat reply received");
        Ok(reply)
    }
}

/// Pull the first choice's message content out of a response
fn extract_reply(response: ChatResponse) -> Result<String> {
    let content = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::malformed(Service::Chat, "response has no choices"))?
        .message
        .and_then(|m| m.content)
        .ok_or_else(|| Error::malformed(Service::Chat, "first choice has no message content"))?;

    if content.trim().is_empty() {
        return Err(Error::malformed(Service::Chat, "reply is empty"));
    }

    Ok(content)
}
