use std::collections::VecDeque;

use super::event::{ExportOutcomeKind, GenerationStage, TelemetryEvent};
use crate::error::ErrorKind;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySnapshot {
    pub generation: GenerationStats,
    pub export: ExportStats,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationStats {
    pub requested: u64,
    pub accepted: u64,
    pub ready: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub avg_ready_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportStats {
    pub runs: u64,
    pub partial: u64,
    pub failed: u64,
    pub artifacts_included: u64,
    pub artifacts_skipped: u64,
}

pub fn compute_snapshot(events: &VecDeque<TelemetryEvent>) -> TelemetrySnapshot {
    let mut snap = TelemetrySnapshot::default();
    let mut ready_ms_total: u64 = 0;

    for event in events {
        match event {
            TelemetryEvent::Generation { stage, elapsed_ms, .. } => match stage {
                GenerationStage::Requested => snap.generation.requested += 1,
                GenerationStage::Accepted => snap.generation.accepted += 1,
                GenerationStage::Ready => {
                    snap.generation.ready += 1;
                    ready_ms_total += elapsed_ms;
                }
                GenerationStage::Failed(kind) => {
                    snap.generation.failed += 1;
                    if *kind == ErrorKind::Timeout {
                        snap.generation.timeouts += 1;
                    }
                }
            },
            TelemetryEvent::Export {
                requested,
                included,
                outcome,
                ..
            } => {
                snap.export.runs += 1;
                snap.export.artifacts_included += *included as u64;
                snap.export.artifacts_skipped += requested.saturating_sub(*included) as u64;
                match outcome {
                    ExportOutcomeKind::Partial => snap.export.partial += 1,
                    ExportOutcomeKind::Failed => snap.export.failed += 1,
                    ExportOutcomeKind::Complete => {}
                }
            }
        }
    }

    if snap.generation.ready > 0 {
        snap.generation.avg_ready_ms = ready_ms_total as f64 / snap.generation.ready as f64;
    }

    snap
}
