//! Shared test utilities

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chara_voice::voice::AudioSink;
use chara_voice::{
    AudioQuery, ChatBackend, Error, Orchestrator, Result, Service, SpeechRecognizer,
    SpeechSynthesizer, Transcript, Turn,
};
use url::Url;

pub const CHARACTER: &str = "You are a cheerful test character.";

/// Chat backend that answers "reply to {input}" and records every request
#[derive(Default)]
pub struct MockChat {
    pub requests: Mutex<Vec<Vec<Turn>>>,
    pub delay: Option<Duration>,
    pub fail: bool,
}

impl MockChat {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<Vec<Turn>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for MockChat {
    async fn complete(&self, messages: &[Turn]) -> Result<String> {
        self.requests.lock().unwrap().push(messages.to_vec());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail {
            return Err(Error::Upstream {
                service: Service::Chat,
                status: Some(500),
                message: "boom".to_string(),
            });
        }

        let input = messages.last().map(Turn::content).unwrap_or_default();
        Ok(format!("reply to {input}"))
    }
}

/// Synthesizer that returns `{"id": 1}` and fixed audio bytes
pub struct MockSynth {
    pub query_texts: Mutex<Vec<String>>,
    pub synthesized: Mutex<Vec<AudioQuery>>,
    pub audio: Vec<u8>,
    pub fail_query: bool,
    pub fail_synthesis: bool,
}

impl Default for MockSynth {
    fn default() -> Self {
        Self {
            query_texts: Mutex::default(),
            synthesized: Mutex::default(),
            audio: b"ABC".to_vec(),
            fail_query: false,
            fail_synthesis: false,
        }
    }
}

impl MockSynth {
    pub fn query_texts(&self) -> Vec<String> {
        self.query_texts.lock().unwrap().clone()
    }

    pub fn synthesized(&self) -> Vec<AudioQuery> {
        self.synthesized.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynth {
    async fn audio_query(&self, text: &str) -> Result<AudioQuery> {
        self.query_texts.lock().unwrap().push(text.to_string());
        if self.fail_query {
            return Err(Error::Upstream {
                service: Service::AudioQuery,
                status: Some(422),
                message: "bad speaker".to_string(),
            });
        }
        Ok(AudioQuery::new(serde_json::json!({ "id": 1 })))
    }

    async fn synthesize(&self, query: &AudioQuery) -> Result<Vec<u8>> {
        self.synthesized.lock().unwrap().push(query.clone());
        if self.fail_synthesis {
            return Err(Error::Upstream {
                service: Service::Synthesis,
                status: Some(500),
                message: "engine crashed".to_string(),
            });
        }
        Ok(self.audio.clone())
    }
}

/// Sink that keeps every clip it is handed
#[derive(Default)]
pub struct MockSink {
    pub played: Mutex<Vec<Vec<u8>>>,
    pub fail: bool,
}

impl MockSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().unwrap().clone()
    }
}

impl AudioSink for MockSink {
    fn play(&self, audio: Vec<u8>) -> Result<()> {
        if self.fail {
            return Err(Error::Audio("output device lost".to_string()));
        }
        self.played.lock().unwrap().push(audio);
        Ok(())
    }
}

/// Recognizer that hears a fixed phrase, or nothing
pub struct MockRecognizer {
    pub heard: Option<String>,
}

#[async_trait]
impl SpeechRecognizer for MockRecognizer {
    async fn recognize(&self) -> Result<Transcript> {
        match &self.heard {
            Some(text) => Ok(Transcript {
                text: text.clone(),
                language: Some("ja".to_string()),
            }),
            None => Err(Error::NoSpeech),
        }
    }
}

/// An orchestrator wired to mocks, with handles to inspect them
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub chat: Arc<MockChat>,
    pub synth: Arc<MockSynth>,
    pub sink: Arc<MockSink>,
}

impl Harness {
    pub fn new(chat: MockChat, synth: MockSynth) -> Self {
        Self::with_sink(chat, synth, MockSink::default())
    }

    pub fn with_sink(chat: MockChat, synth: MockSynth, sink: MockSink) -> Self {
        let chat = Arc::new(chat);
        let synth = Arc::new(synth);
        let sink = Arc::new(sink);
        let orchestrator = Arc::new(Orchestrator::new(
            CHARACTER,
            chat.clone(),
            synth.clone(),
            sink.clone(),
        ));

        Self {
            orchestrator,
            chat,
            synth,
            sink,
        }
    }

    pub fn ok() -> Self {
        Self::new(MockChat::default(), MockSynth::default())
    }
}

/// Serve `router` on an ephemeral local port and return its base URL
pub async fn serve(router: axum::Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind stub server");
    let addr = listener.local_addr().expect("stub server has no address");

    tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("stub server failed");
    });

    Url::parse(&format!("http://{addr}")).expect("invalid stub url")
}

/// A local URL nothing is listening on
pub async fn closed_port() -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().expect("no address");
    drop(listener);
    Url::parse(&format!("http://{addr}")).expect("invalid url")
}
