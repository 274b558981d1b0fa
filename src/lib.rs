//! chara-voice - talk to a character in its own voice
//!
//! This library provides:
//! - The conversation orchestrator (input → chat reply → synthesis → playback)
//! - An OpenAI-compatible chat client
//! - A VOICEVOX synthesis client
//! - Speech recognition (microphone or WAV file, transcribed by Whisper)
//! - Audio output (speakers or WAV files)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │             Input: microphone │ WAV file │ text       │
//! └──────────────────────────┬───────────────────────────┘
//!                            │ SpeechRecognizer
//! ┌──────────────────────────▼───────────────────────────┐
//! │                     Orchestrator                      │
//! │  ChatBackend ─► SpeechSynthesizer (query, synthesis)  │
//! └──────────────────────────┬───────────────────────────┘
//!                            │ AudioSink
//! ┌──────────────────────────▼───────────────────────────┐
//! │             Output: speakers │ WAV files              │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod chat;
pub mod config;
pub mod conversation;
pub mod error;
pub mod orchestrator;
pub mod recognition;
pub mod synthesis;
pub mod voice;

pub use chat::{ChatBackend, OpenAiChat};
pub use config::Config;
pub use conversation::{ConversationHistory, Role, Turn, build_messages};
pub use error::{Error, ErrorKind, Result, Service};
pub use orchestrator::{CycleOutcome, CycleState, Orchestrator, Session};
pub use recognition::{SpeechRecognizer, Transcript, WavFileRecognizer, WhisperTranscriber};
#[cfg(feature = "audio")]
pub use recognition::MicrophoneRecognizer;
pub use synthesis::{AudioQuery, SpeechSynthesizer, VoicevoxClient};
pub use voice::{AudioSink, FileSink};
