use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Play window of one segment, in seconds of the raw audio resource.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trim {
    pub start: f64,
    pub end: f64,
}

impl Trim {
    /// Validated constructor: `0 <= start < end <= raw_duration`.
    pub fn new(start: f64, end: f64, raw_duration: f64) -> Result<Self> {
        let trim = Self { start, end };
        trim.validate(raw_duration)?;
        Ok(trim)
    }

    /// The whole segment `[0, raw_duration]`.
    pub fn full(raw_duration: f64) -> Self {
        Self {
            start: 0.0,
            end: raw_duration.max(0.0),
        }
    }

    pub fn validate(&self, raw_duration: f64) -> Result<()> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(EngineError::validation("trim bounds must be finite"));
        }
        if self.start < 0.0 {
            return Err(EngineError::validation(format!(
                "trim start {:.3}s is negative",
                self.start
            )));
        }
        if self.start >= self.end {
            return Err(EngineError::validation(format!(
                "trim start {:.3}s must be before end {:.3}s",
                self.start, self.end
            )));
        }
        if self.end > raw_duration {
            return Err(EngineError::validation(format!(
                "trim end {:.3}s exceeds segment duration {:.3}s",
                self.end, raw_duration
            )));
        }
        Ok(())
    }

    pub fn effective_duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Raw-audio position for a local (trimmed) offset.
    pub fn to_raw(&self, local_time: f64) -> f64 {
        self.start + local_time
    }

    /// Local (trimmed) offset for a raw-audio position, clamped into the window.
    pub fn to_local(&self, raw_position: f64) -> f64 {
        (raw_position - self.start).clamp(0.0, self.effective_duration())
    }
}

/// Raw audio length plus its current play window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentTiming {
    pub raw_duration: f64,
    pub trim: Trim,
}

impl SegmentTiming {
    pub fn untrimmed(raw_duration: f64) -> Self {
        Self {
            raw_duration,
            trim: Trim::full(raw_duration),
        }
    }

    pub fn with_trim(&self, start: f64, end: f64) -> Result<Self> {
        Ok(Self {
            raw_duration: self.raw_duration,
            trim: Trim::new(start, end, self.raw_duration)?,
        })
    }

    pub fn effective_duration(&self) -> f64 {
        self.trim.effective_duration()
    }
}
