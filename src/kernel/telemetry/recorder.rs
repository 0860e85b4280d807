use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::event::TelemetryEvent;
use super::metrics::{compute_snapshot, TelemetrySnapshot};

const MAX_EVENTS: usize = 10_000;

#[derive(Debug)]
pub struct TelemetryRecorder {
    buffer: VecDeque<TelemetryEvent>,
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self {
            buffer: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn record(&mut self, event: TelemetryEvent) {
        if self.buffer.len() >= MAX_EVENTS {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        compute_snapshot(&self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Recorder handle shared by concurrently running block pipelines.
#[derive(Debug, Clone, Default)]
pub struct SharedTelemetry(Arc<Mutex<TelemetryRecorder>>);

impl SharedTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: TelemetryEvent) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).record(event);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).snapshot()
    }
}
