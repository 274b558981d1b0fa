//! HTTP adapter integration tests
//!
//! Each test starts a local axum stub standing in for the chat API, the
//! VOICEVOX engine or the Whisper endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use chara_voice::voice::{FileSink, samples_to_wav};
use chara_voice::{
    AudioQuery, ChatBackend, Error, ErrorKind, OpenAiChat, Orchestrator, Service,
    SpeechRecognizer, SpeechSynthesizer, Turn, VoicevoxClient, WavFileRecognizer,
    WhisperTranscriber,
};
use secrecy::SecretString;
use serde_json::{Value, json};
use url::Url;

mod common;
use common::{closed_port, serve};

const TIMEOUT: Duration = Duration::from_secs(5);

type Log<T> = Arc<Mutex<Vec<T>>>;

fn api_key() -> SecretString {
    SecretString::from("test-key".to_string())
}

fn v1(base: &Url) -> Url {
    base.join("v1").unwrap()
}

async fn chat_ok(
    State(log): State<Log<(HeaderMap, Value)>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    log.lock().unwrap().push((headers, body));
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": "やあ、元気なのだ" } }]
    }))
}

async fn audio_query_ok(
    State(log): State<Log<HashMap<String, String>>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    log.lock().unwrap().push(params);
    Json(json!({ "id": 1, "speedScale": 1.0 }))
}

async fn synthesis_ok(
    State(log): State<Log<(HashMap<String, String>, Value)>>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Vec<u8> {
    log.lock().unwrap().push((params, body));
    b"RIFFfake".to_vec()
}

async fn transcription_ok(
    State(log): State<Log<(HeaderMap, Bytes)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    log.lock().unwrap().push((headers, body));
    Json(json!({ "text": " こんにちは " }))
}

fn tone(seconds: f32) -> Vec<f32> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let len = (16_000.0 * seconds) as usize;
    (0..len)
        .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin())
        .collect()
}

// Chat

#[tokio::test]
async fn test_chat_sends_model_tokens_and_bearer_key() {
    let log: Log<(HeaderMap, Value)> = Arc::default();
    let base = serve(
        Router::new()
            .route("/v1/chat/completions", post(chat_ok))
            .with_state(log.clone()),
    )
    .await;

    let chat = OpenAiChat::new(api_key(), &v1(&base), TIMEOUT)
        .unwrap()
        .with_model("gpt-4o-mini".to_string())
        .with_max_tokens(120);

    let reply = chat
        .complete(&[Turn::system("character"), Turn::user("こんにちは")])
        .await
        .unwrap();
    assert_eq!(reply, "やあ、元気なのだ");

    let requests = log.lock().unwrap();
    let (headers, body) = &requests[0];
    assert_eq!(headers["authorization"], "Bearer test-key");
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["max_tokens"], 120);
    assert_eq!(
        body["messages"],
        json!([
            { "role": "system", "content": "character" },
            { "role": "user", "content": "こんにちは" },
        ])
    );
}

#[tokio::test]
async fn test_chat_error_status_is_upstream() {
    let base = serve(Router::new().route(
        "/v1/chat/completions",
        post(|| async { (StatusCode::TOO_MANY_REQUESTS, "rate limited") }),
    ))
    .await;

    let chat = OpenAiChat::new(api_key(), &v1(&base), TIMEOUT).unwrap();
    let err = chat.complete(&[Turn::user("hi")]).await.unwrap_err();

    match err {
        Error::Upstream {
            service,
            status,
            message,
        } => {
            assert_eq!(service, Service::Chat);
            assert_eq!(status, Some(429));
            assert_eq!(message, "rate limited");
        }
        other => panic!("expected upstream error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_chat_without_choices_is_upstream() {
    let base = serve(Router::new().route(
        "/v1/chat/completions",
        post(|| async { Json(json!({ "choices": [] })) }),
    ))
    .await;

    let chat = OpenAiChat::new(api_key(), &v1(&base), TIMEOUT).unwrap();
    let err = chat.complete(&[Turn::user("hi")]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert_eq!(err.service(), Some(Service::Chat));
}

#[tokio::test]
async fn test_chat_unreachable_is_transport() {
    let chat = OpenAiChat::new(api_key(), &closed_port().await, TIMEOUT).unwrap();
    let err = chat.complete(&[Turn::user("hi")]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(err.service(), Some(Service::Chat));
}

// VOICEVOX

#[tokio::test]
async fn test_audio_query_encodes_text_and_speaker() {
    let log: Log<HashMap<String, String>> = Arc::default();
    let base = serve(
        Router::new()
            .route("/audio_query", post(audio_query_ok))
            .with_state(log.clone()),
    )
    .await;

    let voicevox = VoicevoxClient::new(base, 3, TIMEOUT).unwrap();
    let text = "a&b=c?こんにちは #1 100%";
    let query = voicevox.audio_query(text).await.unwrap();

    assert_eq!(query.as_value()["id"], 1);

    let params = &log.lock().unwrap()[0];
    assert_eq!(params["text"], text);
    assert_eq!(params["speaker"], "3");
}

#[tokio::test]
async fn test_synthesis_posts_query_verbatim() {
    let log: Log<(HashMap<String, String>, Value)> = Arc::default();
    let base = serve(
        Router::new()
            .route("/synthesis", post(synthesis_ok))
            .with_state(log.clone()),
    )
    .await;

    let voicevox = VoicevoxClient::new(base, 8, TIMEOUT).unwrap();
    let query = AudioQuery::new(json!({ "accent_phrases": [], "speedScale": 1.2 }));
    let audio = voicevox.synthesize(&query).await.unwrap();

    assert_eq!(audio, b"RIFFfake");

    let (params, body) = &log.lock().unwrap()[0];
    assert_eq!(params["speaker"], "8");
    assert_eq!(body, query.as_value());
}

#[tokio::test]
async fn test_voicevox_errors_name_the_failing_request() {
    let base = serve(
        Router::new()
            .route(
                "/audio_query",
                post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "no such speaker") }),
            )
            .route(
                "/synthesis",
                post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "crashed") }),
            ),
    )
    .await;

    let voicevox = VoicevoxClient::new(base, 999, TIMEOUT).unwrap();

    let err = voicevox.audio_query("hi").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Upstream {
            service: Service::AudioQuery,
            status: Some(422),
            ..
        }
    ));

    let err = voicevox
        .synthesize(&AudioQuery::new(json!({})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Upstream {
            service: Service::Synthesis,
            status: Some(500),
            ..
        }
    ));
}

#[tokio::test]
async fn test_empty_synthesis_payload_is_rejected() {
    let base = serve(Router::new().route("/synthesis", post(|| async { Vec::<u8>::new() }))).await;

    let voicevox = VoicevoxClient::new(base, 3, TIMEOUT).unwrap();
    let err = voicevox
        .synthesize(&AudioQuery::new(json!({})))
        .await
        .unwrap_err();

    assert_eq!(err.service(), Some(Service::Synthesis));
    assert_eq!(err.kind(), ErrorKind::Upstream);
}

#[tokio::test]
async fn test_engine_version() {
    let base = serve(Router::new().route("/version", get(|| async { Json("0.14.7") }))).await;

    let voicevox = VoicevoxClient::new(base, 3, TIMEOUT).unwrap();
    assert_eq!(voicevox.version().await.unwrap(), "0.14.7");

    let offline = VoicevoxClient::new(closed_port().await, 3, TIMEOUT).unwrap();
    let err = offline.version().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(err.service(), Some(Service::Engine));
}

// Whisper

#[tokio::test]
async fn test_transcription_uploads_wav_form() {
    let log: Log<(HeaderMap, Bytes)> = Arc::default();
    let base = serve(
        Router::new()
            .route("/v1/audio/transcriptions", post(transcription_ok))
            .with_state(log.clone()),
    )
    .await;

    let transcriber = WhisperTranscriber::new(api_key(), &v1(&base), TIMEOUT).unwrap();
    let wav = samples_to_wav(&tone(0.5), 16_000).unwrap();
    let transcript = transcriber.transcribe(wav).await.unwrap();

    assert_eq!(transcript.text, "こんにちは");
    assert_eq!(transcript.language.as_deref(), Some("ja"));

    let (headers, body) = &log.lock().unwrap()[0];
    assert_eq!(headers["authorization"], "Bearer test-key");
    assert!(
        headers["content-type"]
            .to_str()
            .unwrap()
            .starts_with("multipart/form-data")
    );
    let body = String::from_utf8_lossy(body);
    assert!(body.contains("name=\"model\""));
    assert!(body.contains("whisper-1"));
    assert!(body.contains("filename=\"speech.wav\""));
}

#[tokio::test]
async fn test_blank_transcript_is_no_speech() {
    let base = serve(Router::new().route(
        "/v1/audio/transcriptions",
        post(|| async { Json(json!({ "text": "  " })) }),
    ))
    .await;

    let transcriber = WhisperTranscriber::new(api_key(), &v1(&base), TIMEOUT).unwrap();
    let wav = samples_to_wav(&tone(0.5), 16_000).unwrap();
    let err = transcriber.transcribe(wav).await.unwrap_err();

    assert!(matches!(err, Error::NoSpeech));
}

#[tokio::test]
async fn test_silent_recording_skips_transcription() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("silence.wav");
    std::fs::write(&path, samples_to_wav(&vec![0.0; 16_000], 16_000).unwrap()).unwrap();

    // Any request would fail with a transport error
    let transcriber = WhisperTranscriber::new(api_key(), &closed_port().await, TIMEOUT).unwrap();
    let recognizer = WavFileRecognizer::new(&path, transcriber);

    let err = recognizer.recognize().await.unwrap_err();
    assert!(matches!(err, Error::NoSpeech));
}

#[tokio::test]
async fn test_wav_file_recognizer_transcribes_speech() {
    let log: Log<(HeaderMap, Bytes)> = Arc::default();
    let base = serve(
        Router::new()
            .route("/v1/audio/transcriptions", post(transcription_ok))
            .with_state(log.clone()),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("speech.wav");
    std::fs::write(&path, samples_to_wav(&tone(1.0), 16_000).unwrap()).unwrap();

    let transcriber = WhisperTranscriber::new(api_key(), &v1(&base), TIMEOUT).unwrap();
    let recognizer = WavFileRecognizer::new(&path, transcriber);

    let transcript = recognizer.recognize().await.unwrap();
    assert_eq!(transcript.text, "こんにちは");
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_short_utterance_with_long_pause_is_transcribed() {
    let log: Log<(HeaderMap, Bytes)> = Arc::default();
    let base = serve(
        Router::new()
            .route("/v1/audio/transcriptions", post(transcription_ok))
            .with_state(log.clone()),
    )
    .await;

    // One quiet second of speech, then nine of silence
    let mut samples: Vec<f32> = tone(1.0).into_iter().map(|s| s * 0.2).collect();
    samples.extend(std::iter::repeat_n(0.0, 16_000 * 9));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pause.wav");
    std::fs::write(&path, samples_to_wav(&samples, 16_000).unwrap()).unwrap();

    let transcriber = WhisperTranscriber::new(api_key(), &v1(&base), TIMEOUT).unwrap();
    let recognizer = WavFileRecognizer::new(&path, transcriber);

    let transcript = recognizer.recognize().await.unwrap();
    assert_eq!(transcript.text, "こんにちは");
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_wav_file_is_local_error() {
    let transcriber = WhisperTranscriber::new(api_key(), &closed_port().await, TIMEOUT).unwrap();
    let recognizer = WavFileRecognizer::new("/nonexistent/chara/input.wav", transcriber);

    let err = recognizer.recognize().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Local);
}

// End to end

#[tokio::test]
async fn test_full_cycle_writes_reply_audio() {
    let chat_log: Log<(HeaderMap, Value)> = Arc::default();
    let query_log: Log<HashMap<String, String>> = Arc::default();
    let synthesis_log: Log<(HashMap<String, String>, Value)> = Arc::default();

    let base = serve(
        Router::new()
            .route(
                "/v1/chat/completions",
                post(chat_ok).with_state(chat_log.clone()),
            )
            .route(
                "/audio_query",
                post(audio_query_ok).with_state(query_log.clone()),
            )
            .route(
                "/synthesis",
                post(synthesis_ok).with_state(synthesis_log.clone()),
            ),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(FileSink::new(dir.path()).unwrap());
    let orchestrator = Orchestrator::new(
        "character",
        Arc::new(OpenAiChat::new(api_key(), &v1(&base), TIMEOUT).unwrap()),
        Arc::new(VoicevoxClient::new(base.clone(), 3, TIMEOUT).unwrap()),
        sink.clone(),
    );

    let outcome = orchestrator.accept_text_input("こんにちは").await.unwrap();
    assert_eq!(outcome.reply, "やあ、元気なのだ");

    // The reply text is what gets voiced, and the query goes back unchanged
    assert_eq!(query_log.lock().unwrap()[0]["text"], "やあ、元気なのだ");
    assert_eq!(
        synthesis_log.lock().unwrap()[0].1,
        json!({ "id": 1, "speedScale": 1.0 })
    );

    let written = sink.last_written().unwrap();
    assert_eq!(std::fs::read(written).unwrap(), b"RIFFfake");
    assert_eq!(orchestrator.history().await.len(), 2);
}
