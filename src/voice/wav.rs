//! WAV encoding and decoding

use std::io::Cursor;

use crate::{Error, Result};

/// Decoded mono PCM audio
#[derive(Debug, Clone)]
pub struct PcmAudio {
    /// Samples in [-1.0, 1.0], channels already mixed down
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl PcmAudio {
    /// Playback length
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Convert f32 samples to 16-bit mono WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Decode WAV bytes (as returned by VOICEVOX) into mono f32 samples
///
/// # Errors
///
/// Returns error if the payload is not a readable WAV file
#[allow(clippy::cast_precision_loss)]
pub fn decode_wav(data: &[u8]) -> Result<PcmAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(data))
        .map_err(|e| Error::Audio(format!("invalid WAV payload: {e}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << spec.bits_per_sample.saturating_sub(1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(PcmAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}
