use hound::{SampleFormat, WavReader};
use std::io::Cursor;

use crate::error::{EngineError, Result};

/// First-channel PCM in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Turns encoded audio into samples. The envelope math never sees the format.
pub trait PcmDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl PcmDecoder for WavDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedAudio> {
        let mut reader = WavReader::new(Cursor::new(bytes))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1) as u32)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        let samples = interleaved.into_iter().step_by(channels).collect();
        Ok(DecodedAudio {
            samples,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        })
    }
}

/// Length in seconds from the WAV header alone.
pub fn probe_duration(bytes: &[u8]) -> Result<f64> {
    let reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(EngineError::decode("sample rate is zero"));
    }
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}
