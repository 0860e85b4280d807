use std::sync::Arc;
use tracing::warn;

use super::decode::{PcmDecoder, WavDecoder};
use crate::error::Result;
use crate::kernel::trim::Trim;

/// Smallest divisor used when normalising; an all-silent input stays all zero.
const NORMALIZE_FLOOR: f32 = 1e-6;

/// Mean absolute amplitude over `resolution` equal partitions, normalised
/// by the loudest partition. Always exactly `resolution` points in `[0, 1]`.
pub fn envelope(samples: &[f32], resolution: usize) -> Vec<f32> {
    if resolution == 0 {
        return Vec::new();
    }
    let len = samples.len();
    let mut points = Vec::with_capacity(resolution);

    for i in 0..resolution {
        let start = i * len / resolution;
        let end = ((i + 1) * len / resolution).min(len);
        if start >= end {
            points.push(0.0);
            continue;
        }
        let block = &samples[start..end];
        // Non-finite samples (NaN/inf in float WAVs) count as silence.
        let sum: f64 = block
            .iter()
            .map(|s| if s.is_finite() { s.abs() as f64 } else { 0.0 })
            .sum();
        points.push((sum / block.len() as f64) as f32);
    }

    let peak = points.iter().cloned().fold(0.0f32, f32::max).max(NORMALIZE_FLOOR);
    for p in points.iter_mut() {
        *p = (*p / peak).clamp(0.0, 1.0);
    }
    points
}

/// Deterministic stand-in shown when real audio cannot be decoded.
pub fn synthetic_envelope(resolution: usize) -> Vec<f32> {
    (0..resolution)
        .map(|i| {
            let x = i as f32;
            let v = 0.55 + 0.25 * (x * 0.21).sin() + 0.15 * (x * 0.047).cos();
            v.clamp(0.05, 1.0)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub envelope: Vec<f32>,
    /// Decoded length in seconds; `None` for the placeholder.
    pub duration: Option<f64>,
    pub warning: Option<String>,
}

impl Waveform {
    pub fn is_placeholder(&self) -> bool {
        self.warning.is_some()
    }
}

#[derive(Clone)]
pub struct WaveformSampler {
    decoder: Arc<dyn PcmDecoder>,
    resolution: usize,
}

impl WaveformSampler {
    pub fn new(decoder: Arc<dyn PcmDecoder>, resolution: usize) -> Self {
        Self { decoder, resolution }
    }

    pub fn wav(resolution: usize) -> Self {
        Self::new(Arc::new(WavDecoder), resolution)
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Never fails: undecodable bytes yield the synthetic envelope plus a warning.
    pub fn sample(&self, bytes: &[u8]) -> Waveform {
        match self.decoder.decode(bytes) {
            Ok(audio) => Waveform {
                envelope: envelope(&audio.samples, self.resolution),
                duration: Some(audio.duration()),
                warning: None,
            },
            Err(e) => self.placeholder(e.to_string()),
        }
    }

    /// Same as `sample`, for a source whose fetch may itself have failed.
    pub fn sample_fetched(&self, fetched: Result<Vec<u8>>) -> Waveform {
        match fetched {
            Ok(bytes) => self.sample(&bytes),
            Err(e) => self.placeholder(e.to_string()),
        }
    }

    fn placeholder(&self, reason: String) -> Waveform {
        warn!("Waveform unavailable, drawing placeholder: {}", reason);
        Waveform {
            envelope: synthetic_envelope(self.resolution),
            duration: None,
            warning: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette<C> {
    pub played: C,
    pub unplayed: C,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bar<C> {
    pub index: usize,
    pub height: f32,
    pub color: C,
}

/// Bar chart of `envelope` scaled to `max_height`; bars left of
/// `progress` (a fraction of the whole) take the played colour.
pub fn render_bars<C: Clone>(
    envelope: &[f32],
    progress: f64,
    palette: &Palette<C>,
    max_height: f32,
) -> Vec<Bar<C>> {
    let n = envelope.len();
    let progress = if progress.is_finite() { progress.clamp(0.0, 1.0) } else { 0.0 };
    let played_bars = (progress * n as f64).floor() as usize;

    envelope
        .iter()
        .enumerate()
        .map(|(index, v)| Bar {
            index,
            height: (v.clamp(0.0, 1.0) * max_height).max(1.0),
            color: if index < played_bars {
                palette.played.clone()
            } else {
                palette.unplayed.clone()
            },
        })
        .collect()
}

/// Like `clamp`, but `hi` wins when rounding puts it below `lo`.
fn bounded(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragHandle {
    Start,
    End,
    Region,
}

/// Trim overlay being dragged over one segment's waveform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimSelection {
    pub start: f64,
    pub end: f64,
    duration: f64,
    min_width: f64,
}

impl TrimSelection {
    pub fn new(duration: f64, min_width: f64) -> Self {
        Self::from_trim(Trim::full(duration), duration, min_width)
    }

    pub fn from_trim(trim: Trim, duration: f64, min_width: f64) -> Self {
        let duration = duration.max(0.0);
        let min_width = min_width.min(duration);
        let mut selection = Self {
            start: trim.start,
            end: trim.end,
            duration,
            min_width,
        };
        selection.start = bounded(selection.start, 0.0, duration - min_width);
        selection.end = bounded(selection.end, selection.start + min_width, duration);
        selection
    }

    pub fn width(&self) -> f64 {
        self.end - self.start
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Handle under `position`, ends first. `tolerance` in seconds.
    pub fn hit_test(&self, position: f64, tolerance: f64) -> Option<DragHandle> {
        if (position - self.start).abs() <= tolerance {
            Some(DragHandle::Start)
        } else if (position - self.end).abs() <= tolerance {
            Some(DragHandle::End)
        } else if position > self.start && position < self.end {
            Some(DragHandle::Region)
        } else {
            None
        }
    }

    pub fn drag(&mut self, handle: DragHandle, delta: f64) {
        if !delta.is_finite() {
            return;
        }
        match handle {
            DragHandle::Start => {
                self.start = bounded(self.start + delta, 0.0, self.end - self.min_width);
            }
            DragHandle::End => {
                self.end = bounded(self.end + delta, self.start + self.min_width, self.duration);
            }
            DragHandle::Region => {
                let width = self.width();
                let start = bounded(self.start + delta, 0.0, self.duration - width);
                self.start = start;
                self.end = (start + width).min(self.duration);
            }
        }
    }

    pub fn to_trim(&self) -> Result<Trim> {
        Trim::new(self.start, self.end.min(self.duration), self.duration)
    }
}
