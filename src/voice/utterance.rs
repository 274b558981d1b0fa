//! Utterance endpointing
//!
//! Decides when the user has started and finished speaking, using RMS energy
//! over incoming sample chunks. The recognizer records until this reports
//! [`DetectorState::Complete`].

/// Minimum audio energy threshold to consider speech
pub const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum voiced duration for an utterance, in milliseconds
const MIN_SPEECH_MS: u32 = 300;

/// Trailing silence that ends an utterance, in milliseconds
const END_SILENCE_MS: u32 = 800;

/// State of the utterance detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Waiting,
    /// Speech started, accumulating
    Speaking,
    /// Enough speech followed by enough silence
    Complete,
}

/// Energy-based speech endpoint detector
pub struct UtteranceDetector {
    state: DetectorState,
    buffer: Vec<f32>,
    voiced_samples: usize,
    silence_samples: usize,
    min_speech_samples: usize,
    end_silence_samples: usize,
}

impl UtteranceDetector {
    /// Create a detector for audio at `sample_rate` Hz
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: DetectorState::Waiting,
            buffer: Vec::new(),
            voiced_samples: 0,
            silence_samples: 0,
            min_speech_samples: ms_to_samples(MIN_SPEECH_MS, sample_rate),
            end_silence_samples: ms_to_samples(END_SILENCE_MS, sample_rate),
        }
    }

    /// Feed a chunk of mono samples and return the resulting state
    pub fn process(&mut self, samples: &[f32]) -> DetectorState {
        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            DetectorState::Waiting => {
                if is_speech {
                    self.state = DetectorState::Speaking;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    self.voiced_samples = samples.len();
                    self.silence_samples = 0;
                    tracing::trace!(energy, "speech started");
                }
            }
            DetectorState::Speaking => {
                self.buffer.extend_from_slice(samples);

                if is_speech {
                    self.voiced_samples += samples.len();
                    self.silence_samples = 0;
                } else {
                    self.silence_samples += samples.len();
                }

                if self.silence_samples > self.end_silence_samples {
                    if self.voiced_samples > self.min_speech_samples {
                        tracing::debug!(
                            samples = self.buffer.len(),
                            voiced = self.voiced_samples,
                            "utterance complete"
                        );
                        self.state = DetectorState::Complete;
                    } else {
                        // A click or cough, not speech
                        tracing::trace!("speech too short, resetting");
                        self.reset();
                    }
                }
            }
            DetectorState::Complete => {}
        }

        self.state
    }

    /// Take the recorded utterance and return to waiting
    pub fn take_utterance(&mut self) -> Vec<f32> {
        let buffer = std::mem::take(&mut self.buffer);
        self.reset();
        buffer
    }

    /// Samples recorded so far
    #[must_use]
    pub fn buffer(&self) -> &[f32] {
        &self.buffer
    }

    /// Reset detector to waiting state
    pub fn reset(&mut self) {
        self.state = DetectorState::Waiting;
        self.buffer.clear();
        self.voiced_samples = 0;
        self.silence_samples = 0;
    }

    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }
}

/// Window used when scanning a whole recording for speech, in milliseconds
const SCAN_WINDOW_MS: u32 = 100;

/// Whether no window of a recording reaches the speech threshold
///
/// Energy is measured per window rather than over the whole recording, so a
/// short utterance followed by a long quiet tail still counts as speech.
#[must_use]
pub fn is_silent(samples: &[f32], sample_rate: u32) -> bool {
    let window = ms_to_samples(SCAN_WINDOW_MS, sample_rate).max(1);
    samples
        .chunks(window)
        .all(|chunk| calculate_energy(chunk) <= ENERGY_THRESHOLD)
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

const fn ms_to_samples(ms: u32, sample_rate: u32) -> usize {
    (ms as usize * sample_rate as usize) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(calculate_energy(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(calculate_energy(&loud) > 0.4);

        assert!(calculate_energy(&[]) < f32::EPSILON);
    }

    #[test]
    fn test_ms_to_samples() {
        assert_eq!(ms_to_samples(300, 16_000), 4_800);
        assert_eq!(ms_to_samples(800, 16_000), 12_800);
    }

    #[test]
    fn short_noise_does_not_complete() {
        let mut detector = UtteranceDetector::new(16_000);

        // 0.1s click then a second of silence
        assert_eq!(detector.process(&[0.5; 1_600]), DetectorState::Speaking);
        assert_eq!(detector.process(&[0.0; 16_000]), DetectorState::Waiting);
        assert!(detector.buffer().is_empty());
    }

    #[test]
    fn short_speech_in_long_silence_is_not_silent() {
        let mut samples = vec![0.1_f32; 1_600];
        samples.extend(std::iter::repeat_n(0.0, 16_000 * 9));

        assert!(calculate_energy(&samples) < ENERGY_THRESHOLD);
        assert!(!is_silent(&samples, 16_000));
    }
}
