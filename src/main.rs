use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chara_voice::config::default_output_dir;
use chara_voice::voice::{AudioSink, FileSink};
use chara_voice::{
    Config, CycleOutcome, Error, ErrorKind, OpenAiChat, Orchestrator, SpeechRecognizer,
    SpeechSynthesizer, VoicevoxClient, WavFileRecognizer, WhisperTranscriber,
};

/// chara - talk to a character in its own voice
#[derive(Parser)]
#[command(name = "chara", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// VOICEVOX speaker id (overrides config)
    #[arg(long, global = true)]
    speaker: Option<u32>,

    /// Don't carry previous exchanges into requests
    #[arg(long, global = true)]
    no_history: bool,

    /// Write replies as WAV files into this directory instead of playing them
    #[arg(long, value_name = "DIR", global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive conversation (default)
    Chat {
        /// Press Enter on an empty line to speak instead of typing
        #[arg(long)]
        voice: bool,
    },
    /// Answer one line of text
    Say {
        /// What to say to the character
        text: String,
    },
    /// Answer one spoken utterance
    Listen {
        /// Recognize a recorded WAV file instead of the microphone
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Speak text directly, skipping the chat model
    TestTts {
        /// Text to speak
        #[arg(default_value = "こんにちは。音声合成のテストです。")]
        text: String,
    },
    /// Test speaker output with a tone
    #[cfg(feature = "audio")]
    TestSpeaker,
    /// Show resolved configuration and check the VOICEVOX engine
    Doctor,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "info,chara_voice=debug",
        3 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;

    if let Some(speaker) = cli.speaker {
        config.voicevox.speaker = speaker;
    }
    if cli.no_history {
        config.history = false;
    }
    if cli.output_dir.is_some() {
        config.output_dir = cli.output_dir;
    }

    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Chat { voice: false }) {
        Command::Chat { voice } => cmd_chat(&config, voice).await,
        Command::Say { text } => cmd_say(&config, &text).await,
        Command::Listen { file } => cmd_listen(&config, file).await,
        Command::TestTts { text } => test_tts(&config, &text).await,
        #[cfg(feature = "audio")]
        Command::TestSpeaker => test_speaker().await,
        Command::Doctor => cmd_doctor(&config).await,
    }
}

/// Pick the audio output: a directory if one is configured, else speakers
fn build_sink(config: &Config) -> anyhow::Result<Arc<dyn AudioSink>> {
    if let Some(dir) = &config.output_dir {
        return Ok(Arc::new(FileSink::new(dir)?));
    }

    #[cfg(feature = "audio")]
    let sink: Arc<dyn AudioSink> = Arc::new(chara_voice::voice::SpeakerSink::new()?);

    #[cfg(not(feature = "audio"))]
    let sink: Arc<dyn AudioSink> = {
        let dir = default_output_dir();
        tracing::warn!(
            dir = %dir.display(),
            "built without the audio feature, writing replies to files"
        );
        Arc::new(FileSink::new(dir)?)
    };

    Ok(sink)
}

/// Pick the speech input: a WAV file if given, else the microphone
fn build_recognizer(
    config: &Config,
    file: Option<PathBuf>,
) -> anyhow::Result<Box<dyn SpeechRecognizer>> {
    let transcriber = WhisperTranscriber::from_config(config)?;

    if let Some(path) = file {
        return Ok(Box::new(WavFileRecognizer::new(path, transcriber)));
    }

    #[cfg(feature = "audio")]
    {
        Ok(Box::new(chara_voice::MicrophoneRecognizer::new(
            transcriber,
            config.listen_timeout,
        )))
    }

    #[cfg(not(feature = "audio"))]
    {
        anyhow::bail!("microphone input needs the `audio` feature; pass --file <wav> instead")
    }
}

fn build_orchestrator(config: &Config, sink: Arc<dyn AudioSink>) -> anyhow::Result<Orchestrator> {
    let chat = OpenAiChat::from_config(config)?;
    let voicevox = VoicevoxClient::from_config(config)?;

    Ok(
        Orchestrator::new(config.character.clone(), Arc::new(chat), Arc::new(voicevox), sink)
            .with_history(config.history),
    )
}

/// Interactive conversation loop
async fn cmd_chat(config: &Config, voice: bool) -> anyhow::Result<()> {
    let sink = build_sink(config)?;
    let orchestrator = Arc::new(build_orchestrator(config, sink)?);
    let recognizer = if voice {
        Some(build_recognizer(config, None)?)
    } else {
        None
    };

    // Status line for each stage of a running cycle
    let mut states = orchestrator.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            if !state.is_idle() {
                eprintln!("  ({state}...)");
            }
        }
    });

    println!("Type a message and press Enter. /reset clears history, /quit exits.");
    if recognizer.is_some() {
        println!("Press Enter on an empty line to speak.");
    }

    loop {
        let Some(line) = prompt_line().await? else {
            break;
        };

        let (result, spoken) = match line.trim() {
            "/quit" | "/exit" => break,
            "/reset" => {
                orchestrator.reset_history().await;
                println!("History cleared.");
                continue;
            }
            "" => match &recognizer {
                Some(recognizer) => {
                    println!("Listening...");
                    (orchestrator.accept_voice_input(recognizer.as_ref()).await, true)
                }
                None => continue,
            },
            text => (orchestrator.accept_text_input(text).await, false),
        };

        match result {
            Ok(outcome) => print_outcome(&outcome, spoken),
            Err(e) => report_failure(&e),
        }
    }

    Ok(())
}

/// Answer one line of text and wait for it to be spoken
async fn cmd_say(config: &Config, text: &str) -> anyhow::Result<()> {
    let sink = build_sink(config)?;
    let orchestrator = build_orchestrator(config, Arc::clone(&sink))?;

    let outcome = orchestrator.accept_text_input(text).await?;
    print_outcome(&outcome, false);
    wait_for_playback(sink.as_ref()).await;
    Ok(())
}

/// Answer one spoken utterance and wait for it to be spoken
async fn cmd_listen(config: &Config, file: Option<PathBuf>) -> anyhow::Result<()> {
    let sink = build_sink(config)?;
    let orchestrator = build_orchestrator(config, Arc::clone(&sink))?;
    let from_microphone = file.is_none();
    let recognizer = build_recognizer(config, file)?;

    if from_microphone {
        println!("Listening...");
    }

    match orchestrator.accept_voice_input(recognizer.as_ref()).await {
        Ok(outcome) => {
            print_outcome(&outcome, true);
            wait_for_playback(sink.as_ref()).await;
            Ok(())
        }
        Err(e) => anyhow::bail!(failure_message(&e)),
    }
}

/// Synthesize and play text without the chat model
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing VOICEVOX with text: \"{text}\"\n");

    let voicevox = VoicevoxClient::from_config(config)?;
    let sink = build_sink(config)?;

    println!("Speaker: {}", voicevox.speaker());
    println!("Requesting audio query...");
    let query = voicevox.audio_query(text).await?;

    println!("Synthesizing speech...");
    let audio = voicevox.synthesize(&query).await?;
    println!("Got {} bytes of audio data", audio.len());

    sink.play(audio)?;
    wait_for_playback(sink.as_ref()).await;

    println!("\n---");
    println!("If you heard the voice (or see the WAV file), synthesis is working!");
    Ok(())
}

/// Test speaker output with a sine wave
#[cfg(feature = "audio")]
async fn test_speaker() -> anyhow::Result<()> {
    use chara_voice::voice::{SpeakerSink, test_tone};

    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sink = SpeakerSink::new()?;
    sink.play_pcm(test_tone(440.0, Duration::from_secs(2), 24_000))?;
    wait_for_playback(&sink).await;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Show resolved configuration and check the engine is reachable
async fn cmd_doctor(config: &Config) -> anyhow::Result<()> {
    let has_key = config.api_keys.openai.is_some();
    let config_file = chara_voice::config::file::config_file_path()
        .map_or_else(|| "(none)".to_string(), |p| p.display().to_string());
    let output = config.output_dir.as_ref().map_or_else(
        || {
            if cfg!(feature = "audio") {
                "speakers".to_string()
            } else {
                default_output_dir().display().to_string()
            }
        },
        |d| d.display().to_string(),
    );

    println!("chara doctor\n");
    println!("Config file:     {config_file}");
    println!(
        "OpenAI API key:  {}",
        if has_key { "set" } else { "missing" }
    );
    println!(
        "Chat:            {} ({}, max {} tokens)",
        config.chat.base_url, config.chat.model, config.chat.max_tokens
    );
    println!(
        "Transcription:   {} ({}, language {})",
        config.stt.base_url, config.stt.model, config.stt.language
    );
    println!(
        "VOICEVOX:        {} (speaker {})",
        config.voicevox.base_url, config.voicevox.speaker
    );
    println!(
        "History:         {}",
        if config.history { "on" } else { "off" }
    );
    println!("Request timeout: {}s", config.request_timeout.as_secs());
    println!("Output:          {output}");
    println!(
        "Character:       {}",
        config.character.lines().next().unwrap_or_default()
    );
    println!();

    let voicevox = VoicevoxClient::from_config(config)?;
    match voicevox.version().await {
        Ok(version) => println!("VOICEVOX engine reachable (version {version})"),
        Err(e) => println!("VOICEVOX engine NOT reachable: {e}"),
    }

    if !has_key {
        println!("Set OPENAI_API_KEY or [api_keys] openai in the config file to chat.");
    }

    Ok(())
}

/// Read one line from the terminal; `None` on end of input
async fn prompt_line() -> anyhow::Result<Option<String>> {
    let line = tokio::task::spawn_blocking(|| {
        dialoguer::Input::<String>::new()
            .with_prompt("you")
            .allow_empty(true)
            .interact_text()
    })
    .await?;

    match line {
        Ok(line) => Ok(Some(line)),
        Err(dialoguer::Error::IO(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn print_outcome(outcome: &CycleOutcome, echo_input: bool) {
    if echo_input {
        println!("you> {}", outcome.input);
    }
    println!("chara> {}", outcome.reply);
}

/// Tell the user why a cycle failed; the session carries on
fn report_failure(error: &Error) {
    eprintln!("{}", failure_message(error));
}

/// User-facing description of a failed cycle
fn failure_message(error: &Error) -> String {
    match (error.kind(), error.service()) {
        (ErrorKind::Input, _) => match error {
            Error::NoSpeech => "Didn't catch that. Try again.".to_string(),
            _ => "Nothing to send.".to_string(),
        },
        (ErrorKind::Transport, Some(service)) => format!("Could not reach {service}: {error}"),
        (ErrorKind::Upstream, Some(service)) => {
            format!("The {service} service returned an error: {error}")
        }
        (ErrorKind::Upstream, None) => format!("Unexpected response: {error}"),
        _ => format!("Error: {error}"),
    }
}

async fn wait_for_playback(sink: &dyn AudioSink) {
    while sink.is_playing() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
