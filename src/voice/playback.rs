//! Audio playback to speakers

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use super::sink::AudioSink;
use super::wav::{PcmAudio, decode_wav};
use crate::{Error, Result};

/// Extra time granted past the nominal clip length before giving up
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Flags shared with one playback thread
struct Playback {
    stop: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
}

/// Plays synthesized WAV on the default output device
///
/// Single slot: starting a clip stops the one before it.
pub struct SpeakerSink {
    current: Mutex<Option<Playback>>,
}

impl SpeakerSink {
    /// Check that an output device exists
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self {
            current: Mutex::new(None),
        })
    }

    /// Start playing decoded samples
    ///
    /// # Errors
    ///
    /// Returns error if the playback slot is poisoned
    pub fn play_pcm(&self, audio: PcmAudio) -> Result<()> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| Error::Audio("playback state poisoned".to_string()))?;

        if let Some(previous) = current.take() {
            previous.stop.store(true, Ordering::Relaxed);
            tracing::debug!("replacing current playback");
        }

        if audio.samples.is_empty() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread_done = Arc::clone(&done);

        // cpal streams are not Send; the stream lives and dies on this thread
        std::thread::Builder::new()
            .name("chara-playback".to_string())
            .spawn(move || {
                if let Err(e) = play_blocking(&audio, &thread_stop) {
                    tracing::error!(error = %e, "audio playback failed");
                }
                thread_done.store(true, Ordering::Release);
            })?;

        *current = Some(Playback { stop, done });
        Ok(())
    }
}

impl AudioSink for SpeakerSink {
    fn play(&self, audio: Vec<u8>) -> Result<()> {
        let pcm = decode_wav(&audio)?;
        tracing::debug!(
            samples = pcm.samples.len(),
            sample_rate = pcm.sample_rate,
            "starting playback"
        );
        self.play_pcm(pcm)
    }

    fn is_playing(&self) -> bool {
        self.current
            .lock()
            .ok()
            .and_then(|current| {
                current
                    .as_ref()
                    .map(|p| !p.done.load(Ordering::Acquire))
            })
            .unwrap_or(false)
    }
}

/// Find an output config at `sample_rate`, mono first, then stereo
fn output_config(device: &Device, sample_rate: u32) -> Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let supports = |channels: u16| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
        })
    };

    supports(1)
        .or_else(|| supports(2))
        .map(|c| c.with_sample_rate(rate).config())
        .ok_or_else(|| {
            Error::Audio(format!("no output config supports {sample_rate} Hz"))
        })
}

/// Play samples until they run out or `stop` is raised
fn play_blocking(audio: &PcmAudio, stop: &AtomicBool) -> Result<()> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let config = output_config(&device, audio.sample_rate)?;
    let channels = usize::from(config.channels);

    let samples = Arc::new(audio.samples.clone());
    let position = Arc::new(AtomicUsize::new(0));
    let callback_samples = Arc::clone(&samples);
    let callback_position = Arc::clone(&position);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = callback_position.load(Ordering::Relaxed);
                for frame in data.chunks_mut(channels) {
                    let sample = callback_samples.get(pos).copied().unwrap_or(0.0);
                    frame.fill(sample);
                    if pos < callback_samples.len() {
                        pos += 1;
                    }
                }
                callback_position.store(pos, Ordering::Relaxed);
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let deadline = std::time::Instant::now() + audio.duration() + DRAIN_GRACE;
    while position.load(Ordering::Relaxed) < samples.len() {
        if stop.load(Ordering::Relaxed) {
            tracing::debug!("playback stopped early");
            return Ok(());
        }
        if std::time::Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    // Let the device flush its last buffer
    std::thread::sleep(Duration::from_millis(100));
    drop(stream);
    tracing::debug!(samples = samples.len(), "playback complete");

    Ok(())
}

/// Generate a sine tone, used to check speaker output
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn test_tone(frequency: f32, duration: Duration, sample_rate: u32) -> PcmAudio {
    let num_samples = (sample_rate as f32 * duration.as_secs_f32()) as usize;
    let samples = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    PcmAudio {
        samples,
        sample_rate,
    }
}
