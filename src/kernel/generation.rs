use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::block::{Block, BlockFailure, BlockId, GenerationState};
use super::cancel::CancellationRegistry;
use super::scheduler::RecheckScheduler;
use super::state::{BlockDelta, BlockStore};
use super::telemetry::event::{GenerationStage, TelemetryEvent};
use super::telemetry::recorder::SharedTelemetry;
use crate::audio::decode::probe_duration;
use crate::error::{EngineError, ErrorKind, Result};
use crate::services::storage::ObjectStore;
use crate::services::synthesis::{JobStatus, SynthesisProvider, SynthesisRequest};

/// How one generation attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Ready {
        block_id: BlockId,
        job_id: String,
        duration: f64,
    },
    Failed {
        block_id: BlockId,
        failure: BlockFailure,
    },
}

impl GenerationOutcome {
    pub fn block_id(&self) -> BlockId {
        match self {
            GenerationOutcome::Ready { block_id, .. } | GenerationOutcome::Failed { block_id, .. } => *block_id,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, GenerationOutcome::Ready { .. })
    }
}

/// Checks the submit preconditions and builds the provider request.
/// Touches no network.
pub fn prepare_request(block: &Block) -> Result<SynthesisRequest> {
    if !matches!(block.generation_state, GenerationState::Idle | GenerationState::Failed) {
        return Err(EngineError::validation(format!(
            "block {} is {:?}; only idle or failed blocks can be submitted",
            block.id, block.generation_state
        )));
    }
    let text = block.text();
    if text.is_empty() {
        return Err(EngineError::validation(format!("block {} has no text", block.id)));
    }
    let voice_id = block
        .voice()
        .ok_or_else(|| EngineError::validation(format!("block {} has no voice assigned", block.id)))?;
    Ok(SynthesisRequest {
        text,
        voice_id: voice_id.to_string(),
        diacritics: block.diacritics_enabled,
    })
}

/// Drives one block at a time through Idle -> Requesting -> Polling -> Ready | Failed.
/// Each step writes a delta against the *current* list snapshot, addressed by id.
#[derive(Clone)]
pub struct BlockGenerator {
    provider: Arc<dyn SynthesisProvider>,
    objects: Arc<dyn ObjectStore>,
    store: BlockStore,
    cancels: Arc<CancellationRegistry>,
    scheduler: RecheckScheduler,
    telemetry: SharedTelemetry,
    key_prefix: String,
}

impl BlockGenerator {
    pub fn new(
        provider: Arc<dyn SynthesisProvider>,
        objects: Arc<dyn ObjectStore>,
        store: BlockStore,
        scheduler: RecheckScheduler,
    ) -> Self {
        Self {
            provider,
            objects,
            store,
            cancels: Arc::new(CancellationRegistry::new()),
            scheduler,
            telemetry: SharedTelemetry::new(),
            key_prefix: String::new(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: SharedTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Namespace for uploaded objects, usually the project id.
    pub fn with_key_prefix<T: Into<String>>(mut self, prefix: T) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn cancellations(&self) -> &Arc<CancellationRegistry> {
        &self.cancels
    }

    /// Stops the recheck loop of an outstanding job. Its block ends `Failed`.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        self.cancels.cancel(job_id)
    }

    /// Runs a full attempt for `block_id`. Never returns an error: every
    /// failure lands on the block and in the outcome.
    pub async fn submit(&self, block_id: BlockId) -> GenerationOutcome {
        let started = Instant::now();
        let snapshot = self.store.snapshot();
        let Some(block) = snapshot.get(&block_id) else {
            return GenerationOutcome::Failed {
                block_id,
                failure: BlockFailure {
                    kind: ErrorKind::Validation,
                    reason: format!("block {} does not exist", block_id),
                },
            };
        };

        let request = match prepare_request(block) {
            Ok(request) => request,
            Err(e) => {
                // An in-flight block keeps its state; anything else records the rejection.
                if block.generation_state.in_flight() {
                    return GenerationOutcome::Failed {
                        block_id,
                        failure: failure_of(&e),
                    };
                }
                return self.fail(block_id, None, e, started);
            }
        };

        let (before, _) = self.store.apply_from(BlockDelta::GenerationRequested(block_id));
        let claimed = before
            .get(&block_id)
            .is_some_and(|b| matches!(b.generation_state, GenerationState::Idle | GenerationState::Failed));
        if !claimed {
            // Another submit won the transition, or the block is gone.
            return GenerationOutcome::Failed {
                block_id,
                failure: BlockFailure {
                    kind: ErrorKind::Validation,
                    reason: format!("block {} is already generating or was removed", block_id),
                },
            };
        }
        self.record(block_id, GenerationStage::Requested, started);
        info!("Block {} requesting synthesis ({} chars)", block_id, request.text.len());

        let job_id = match self.provider.create_job(&request).await {
            Ok(job_id) => job_id,
            Err(e) => return self.fail(block_id, None, e, started),
        };

        self.store.apply(BlockDelta::JobAccepted {
            id: block_id,
            job_id: job_id.clone(),
        });
        self.record(block_id, GenerationStage::Accepted, started);
        debug!("Block {} polling job {}", block_id, job_id);

        match self.complete(block_id, &job_id, request.text).await {
            Ok(duration) => {
                self.record(block_id, GenerationStage::Ready, started);
                info!("Block {} ready ({:.2}s) from job {}", block_id, duration, job_id);
                GenerationOutcome::Ready {
                    block_id,
                    job_id,
                    duration,
                }
            }
            Err(e) => self.fail(block_id, Some(&job_id), e, started),
        }
    }

    async fn complete(&self, block_id: BlockId, job_id: &str, text: String) -> Result<f64> {
        // Register before checking ownership: a removal either sees the token or
        // has already dropped the block.
        let token = self.cancels.register(job_id);
        if !self.owns_job(block_id, job_id) {
            self.cancels.release(job_id);
            debug!("Block {} gone before job {} was polled", block_id, job_id);
            return Err(EngineError::Cancelled(job_id.to_string()));
        }
        let status = self.scheduler.run(self.provider.as_ref(), job_id, &token).await;
        self.cancels.release(job_id);

        if status? == JobStatus::Failed {
            return Err(EngineError::provider(None, format!("provider reported job {} failed", job_id)));
        }
        if !self.owns_job(block_id, job_id) {
            return Err(EngineError::Cancelled(job_id.to_string()));
        }

        let bytes = self.provider.fetch_result(job_id).await?;
        let duration = probe_duration(&bytes)?;
        if duration <= 0.0 {
            return Err(EngineError::decode(format!("job {} produced empty audio", job_id)));
        }

        let key = self.object_key(block_id, job_id);
        let stored = self.objects.upload(&key, bytes).await?;
        let signed = self.objects.signed_url(&stored.durable_url).await?;

        if !self.owns_job(block_id, job_id) {
            return Err(EngineError::Cancelled(job_id.to_string()));
        }

        self.store.apply(BlockDelta::GenerationSucceeded {
            id: block_id,
            job_id: job_id.to_string(),
            audio_ref: signed.url,
            persisted_url: stored.durable_url,
            duration,
            text,
        });
        Ok(duration)
    }

    fn fail(&self, block_id: BlockId, job_id: Option<&str>, error: EngineError, started: Instant) -> GenerationOutcome {
        let failure = failure_of(&error);
        warn!("Block {} generation failed: {}", block_id, error);

        let superseded = job_id.is_some_and(|job| !self.owns_job(block_id, job));
        if superseded {
            debug!("Block {} moved on from job {}; leaving it untouched", block_id, job_id.unwrap_or_default());
        } else {
            self.store.apply(BlockDelta::GenerationFailed {
                id: block_id,
                failure: failure.clone(),
            });
        }
        self.record(block_id, GenerationStage::Failed(failure.kind), started);
        GenerationOutcome::Failed { block_id, failure }
    }

    /// The block still exists and still waits on `job_id`.
    fn owns_job(&self, block_id: BlockId, job_id: &str) -> bool {
        self.store
            .snapshot()
            .get(&block_id)
            .is_some_and(|b| b.generation_state == GenerationState::Polling && b.job_id.as_deref() == Some(job_id))
    }

    fn object_key(&self, block_id: BlockId, job_id: &str) -> String {
        let safe_job: String = job_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        if self.key_prefix.is_empty() {
            format!("{}/{}.wav", block_id, safe_job)
        } else {
            format!("{}/{}/{}.wav", self.key_prefix, block_id, safe_job)
        }
    }

    fn record(&self, block_id: BlockId, stage: GenerationStage, started: Instant) {
        self.telemetry.record(TelemetryEvent::Generation {
            block_id,
            stage,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });
    }
}

fn failure_of(error: &EngineError) -> BlockFailure {
    BlockFailure {
        kind: error.kind(),
        reason: error.to_string(),
    }
}
