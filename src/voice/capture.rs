//! Microphone capture

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::utterance::{DetectorState, UtteranceDetector};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// How often the capture buffer is drained into the detector
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Longest utterance recorded before it is cut off
const MAX_UTTERANCE: Duration = Duration::from_secs(30);

/// Default input device, recording 16kHz mono
///
/// Holds a `cpal::Stream`, which is not `Send` on every platform; create and
/// drop it on the same thread.
pub struct Microphone {
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl Microphone {
    /// Open the default input device
    ///
    /// # Errors
    ///
    /// Returns error if no input device supports 16kHz mono
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            "microphone opened"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing into the internal buffer
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be started
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("audio capture stopped");
        }
    }

    /// Samples captured since the last call
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// Record one utterance, blocking the calling thread
    ///
    /// Returns `None` if no complete utterance arrives within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns error if capture cannot start
    pub fn record_utterance(&mut self, timeout: Duration) -> Result<Option<Vec<f32>>> {
        let mut detector = UtteranceDetector::new(SAMPLE_RATE);
        let _ = self.take_buffer();
        self.start()?;

        let started = Instant::now();
        let outcome = loop {
            std::thread::sleep(POLL_INTERVAL);

            let chunk = self.take_buffer();
            if !chunk.is_empty() && detector.process(&chunk) == DetectorState::Complete {
                break Some(detector.take_utterance());
            }

            // Let a started utterance finish even past the deadline
            if started.elapsed() > timeout && detector.state() == DetectorState::Waiting {
                tracing::debug!(timeout_secs = timeout.as_secs(), "no speech before timeout");
                break None;
            }

            if started.elapsed() > timeout + MAX_UTTERANCE {
                tracing::warn!("utterance too long, cutting off");
                break Some(detector.take_utterance());
            }
        };

        self.stop();
        Ok(outcome)
    }
}
