use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::kernel::block::BlockId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryEvent {
    Generation {
        block_id: BlockId,
        stage: GenerationStage,
        elapsed_ms: u64,
    },

    Export {
        requested: usize,
        included: usize,
        elapsed_ms: u64,
        outcome: ExportOutcomeKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationStage {
    Requested,
    Accepted,
    Ready,
    Failed(ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportOutcomeKind {
    Complete,
    Partial,
    Failed,
}
