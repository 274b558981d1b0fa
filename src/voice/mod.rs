//! Voice processing module
//!
//! Handles audio capture, utterance endpointing, WAV handling and playback.
//! Device access (`Microphone`, `SpeakerSink`) needs the `audio` feature.

#[cfg(feature = "audio")]
mod capture;
#[cfg(feature = "audio")]
mod playback;
mod sink;
mod utterance;
mod wav;

#[cfg(feature = "audio")]
pub use capture::{Microphone, SAMPLE_RATE};
#[cfg(feature = "audio")]
pub use playback::{SpeakerSink, test_tone};
pub use sink::{AudioSink, FileSink};
pub use utterance::{DetectorState, ENERGY_THRESHOLD, UtteranceDetector, calculate_energy, is_silent};
pub use wav::{PcmAudio, decode_wav, samples_to_wav};
