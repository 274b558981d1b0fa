//! Conversation orchestrator
//!
//! Drives one utterance through the whole pipeline:
//!
//! ```text
//! input text ─► chat reply ─► audio query ─► audio bytes ─► playback
//! ```
//!
//! Each stage takes the previous stage's output, so a failure anywhere stops
//! the cycle before the next request is sent. Cycles are serialized: a cycle
//! started while another is running waits for it, which keeps history as
//! contiguous `(user, system)` pairs.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::Instrument;
use uuid::Uuid;

use crate::chat::ChatBackend;
use crate::conversation::{ConversationHistory, Turn, build_messages};
use crate::recognition::SpeechRecognizer;
use crate::synthesis::{AudioQuery, SpeechSynthesizer};
use crate::voice::AudioSink;
use crate::{Error, Result};

/// Where the current cycle is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// No cycle running
    Idle,
    /// Waiting for the chat reply
    RequestingReply,
    /// Waiting for the synthesis query
    RequestingAudioQuery,
    /// Waiting for rendered audio
    RequestingSynthesis,
    /// Handing audio to the output
    Playing,
    /// Last cycle failed; behaves like `Idle`
    Failed,
}

impl CycleState {
    /// Whether a new cycle would start immediately
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(self, Self::Idle | Self::Failed)
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::RequestingReply => "thinking",
            Self::RequestingAudioQuery => "preparing voice",
            Self::RequestingSynthesis => "synthesizing",
            Self::Playing => "speaking",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Mutable per-session context
#[derive(Debug, Default)]
pub struct Session {
    input_text: String,
    history: ConversationHistory,
    track_history: bool,
}

impl Session {
    /// Create a session with empty history
    #[must_use]
    pub fn new(track_history: bool) -> Self {
        Self {
            input_text: String::new(),
            history: ConversationHistory::new(),
            track_history,
        }
    }

    /// Most recent input, as shown to the user
    #[must_use]
    pub fn input_text(&self) -> &str {
        &self.input_text
    }

    #[must_use]
    pub const fn history(&self) -> &ConversationHistory {
        &self.history
    }

    #[must_use]
    pub const fn tracks_history(&self) -> bool {
        self.track_history
    }
}

/// Result of a completed cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Text the cycle was run for
    pub input: String,
    /// Character's reply
    pub reply: String,
    /// Size of the audio handed to the output
    pub audio_bytes: usize,
}

/// Runs utterance → spoken reply cycles
pub struct Orchestrator {
    character: String,
    chat: Arc<dyn ChatBackend>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn AudioSink>,
    session: Mutex<Session>,
    cycle_lock: Mutex<()>,
    state: watch::Sender<CycleState>,
}

impl Orchestrator {
    /// Create an orchestrator with history tracking on
    pub fn new(
        character: impl Into<String>,
        chat: Arc<dyn ChatBackend>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        let (state, _) = watch::channel(CycleState::Idle);
        Self {
            character: character.into(),
            chat,
            synthesizer,
            sink,
            session: Mutex::new(Session::new(true)),
            cycle_lock: Mutex::new(()),
            state,
        }
    }

    /// Turn history tracking on or off
    #[must_use]
    pub fn with_history(mut self, enabled: bool) -> Self {
        self.session.get_mut().track_history = enabled;
        self
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CycleState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> CycleState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn character(&self) -> &str {
        &self.character
    }

    /// Most recent input text
    pub async fn input_text(&self) -> String {
        self.session.lock().await.input_text.clone()
    }

    /// Snapshot of the conversation history
    pub async fn history(&self) -> Vec<Turn> {
        self.session.lock().await.history.turns().to_vec()
    }

    /// Forget all previous exchanges
    ///
    /// Waits for a running cycle to finish, so its exchange is cleared too.
    pub async fn reset_history(&self) {
        let _running = self.cycle_lock.lock().await;
        self.session.lock().await.history.clear();
        tracing::info!("conversation history cleared");
    }

    /// Listen once, then answer what was heard
    ///
    /// The transcript becomes the visible input text before the cycle runs.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoSpeech` if nothing was heard, or any cycle error
    pub async fn accept_voice_input(
        &self,
        recognizer: &dyn SpeechRecognizer,
    ) -> Result<CycleOutcome> {
        let transcript = recognizer.recognize().await?;
        let text = transcript.text.trim();
        if text.is_empty() {
            return Err(Error::NoSpeech);
        }

        tracing::info!(transcript = %text, "voice input received");
        self.set_input_text(text).await;
        self.run_cycle(text).await
    }

    /// Answer typed text
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyInput` for blank text, or any cycle error
    pub async fn accept_text_input(&self, text: &str) -> Result<CycleOutcome> {
        if text.trim().is_empty() {
            return Err(Error::EmptyInput);
        }

        self.set_input_text(text).await;
        self.run_cycle(text).await
    }

    /// Run the full pipeline for `input`
    ///
    /// On success playback has started and, with history tracking on, one
    /// user turn and one system turn were appended in that order. On failure
    /// history is untouched.
    ///
    /// # Errors
    ///
    /// Returns the first stage error; later stages are not attempted
    pub async fn run_cycle(&self, input: &str) -> Result<CycleOutcome> {
        if input.trim().is_empty() {
            return Err(Error::EmptyInput);
        }

        let _running = self.cycle_lock.lock().await;
        let span = tracing::info_span!("cycle", id = %Uuid::new_v4());

        async {
            let result = self.drive(input).await;
            match &result {
                Ok(outcome) => {
                    self.state.send_replace(CycleState::Idle);
                    tracing::info!(reply_len = outcome.reply.len(), "cycle complete");
                }
                Err(e) => {
                    self.state.send_replace(CycleState::Failed);
                    tracing::warn!(error = %e, kind = ?e.kind(), "cycle failed");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Ask the chat backend for a reply to `input`
    ///
    /// # Errors
    ///
    /// Returns a transport or upstream error from the chat backend
    pub async fn request_reply(&self, input: &str) -> Result<String> {
        let messages = {
            let session = self.session.lock().await;
            let history: &[Turn] = if session.track_history {
                session.history.turns()
            } else {
                &[]
            };
            build_messages(&self.character, history, input)
        };

        self.chat.complete(&messages).await
    }

    /// Build a synthesis query for `reply`
    ///
    /// # Errors
    ///
    /// Returns a transport or upstream error from the synthesizer
    pub async fn request_audio_query(&self, reply: &str) -> Result<AudioQuery> {
        self.synthesizer.audio_query(reply).await
    }

    /// Render a synthesis query to audio
    ///
    /// # Errors
    ///
    /// Returns a transport or upstream error from the synthesizer
    pub async fn request_synthesis(&self, query: &AudioQuery) -> Result<Vec<u8>> {
        self.synthesizer.synthesize(query).await
    }

    /// Start playback without waiting for it to finish
    ///
    /// # Errors
    ///
    /// Returns error if the output rejects the audio
    pub fn play(&self, audio: Vec<u8>) -> Result<()> {
        self.sink.play(audio)
    }

    async fn drive(&self, input: &str) -> Result<CycleOutcome> {
        self.state.send_replace(CycleState::RequestingReply);
        let reply = self.request_reply(input).await?;
        tracing::debug!(reply = %reply, "reply received");

        self.state.send_replace(CycleState::RequestingAudioQuery);
        let query = self.request_audio_query(&reply).await?;

        self.state.send_replace(CycleState::RequestingSynthesis);
        let audio = self.request_synthesis(&query).await?;
        let audio_bytes = audio.len();

        self.state.send_replace(CycleState::Playing);
        self.play(audio)?;

        let mut session = self.session.lock().await;
        if session.track_history {
            session.history.push_exchange(input, reply.clone());
        }

        Ok(CycleOutcome {
            input: input.to_string(),
            reply,
            audio_bytes,
        })
    }

    async fn set_input_text(&self, text: &str) {
        self.session.lock().await.input_text = text.to_string();
    }
}
