use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::audio::waveform::{Waveform, WaveformSampler};
use crate::config::AppConfig;
use crate::error::{EngineError, Result};
use crate::export::concat;
use crate::export::merger::{ExportArtifact, ExportMerger};
use crate::kernel::block::{Block, BlockFailure, BlockId, GenerationState, RichContent};
use crate::kernel::generation::{BlockGenerator, GenerationOutcome};
use crate::kernel::scheduler::RecheckScheduler;
use crate::kernel::state::{BlockDelta, BlockList, BlockStore};
use crate::kernel::telemetry::metrics::TelemetrySnapshot;
use crate::kernel::telemetry::recorder::SharedTelemetry;
use crate::kernel::timeline::{PlaybackEffect, PlaybackProgress, Timeline, TimelineEngine};
use crate::kernel::trim::Trim;
use crate::services::storage::{DocumentStore, ObjectStore};
use crate::services::synthesis::SynthesisProvider;

/// Aggregate of one fan-out generation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub succeeded: Vec<BlockId>,
    pub failed: Vec<(BlockId, BlockFailure)>,
}

impl GenerationReport {
    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        !self.succeeded.is_empty() && !self.failed.is_empty()
    }

    pub fn all_failed(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }
}

/// UI-facing coordinator for one project: edits, generation fan-out,
/// timeline transport, persistence and export.
pub struct Orchestrator {
    project_id: String,
    store: BlockStore,
    generator: BlockGenerator,
    provider: Arc<dyn SynthesisProvider>,
    objects: Arc<dyn ObjectStore>,
    documents: Arc<dyn DocumentStore>,
    merger: ExportMerger,
    sampler: WaveformSampler,
    min_selection_secs: f64,
    engine: Mutex<TimelineEngine>,
    telemetry: SharedTelemetry,
}

impl Orchestrator {
    pub fn new(
        project_id: impl Into<String>,
        config: &AppConfig,
        provider: Arc<dyn SynthesisProvider>,
        objects: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        let project_id = project_id.into();
        let telemetry = SharedTelemetry::new();
        let store = BlockStore::default();

        let generator = BlockGenerator::new(
            provider.clone(),
            objects.clone(),
            store.clone(),
            RecheckScheduler::from_config(&config.generation),
        )
        .with_telemetry(telemetry.clone())
        .with_key_prefix(project_id.clone());

        let merger = ExportMerger::new(
            provider.clone(),
            concat::from_config(&config.export),
            config.export.work_dir.clone(),
            config.export.file_name.clone(),
        )
        .with_telemetry(telemetry.clone());

        Self {
            project_id,
            store,
            generator,
            provider,
            objects,
            documents,
            merger,
            sampler: WaveformSampler::wav(config.waveform.resolution),
            min_selection_secs: config.waveform.min_selection_secs,
            engine: Mutex::new(TimelineEngine::default()),
            telemetry,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn generator(&self) -> &BlockGenerator {
        &self.generator
    }

    pub fn snapshot(&self) -> Arc<BlockList> {
        self.store.snapshot()
    }

    pub fn block(&self, id: &BlockId) -> Option<Block> {
        self.store.snapshot().get(id).cloned()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    /// Smallest trim window the overlay allows.
    pub fn min_selection_secs(&self) -> f64 {
        self.min_selection_secs
    }

    // --- Project ---------------------------------------------------------

    /// Replaces the in-memory list with the stored one. Jobs that were in
    /// flight when the project was saved cannot be resumed and restart at
    /// `Idle`; ready blocks get fresh playback URLs.
    pub async fn load(&self) -> Result<usize> {
        let mut blocks = self.documents.get_blocks(&self.project_id).await?;
        for block in blocks.iter_mut() {
            if block.generation_state.in_flight() {
                debug!("Block {} was {:?} when saved; resetting", block.id, block.generation_state);
                block.generation_state = GenerationState::Idle;
            }
        }
        let count = blocks.len();
        self.store.apply(BlockDelta::Replaced(blocks));

        let ready: Vec<BlockId> = self
            .store
            .snapshot()
            .ordered()
            .filter(|b| b.is_ready())
            .map(|b| b.id)
            .collect();
        for id in ready {
            if let Err(e) = self.refresh_playback_url(id).await {
                warn!("Block {} has no playable audio after load: {}", id, e);
            }
        }

        self.sync_timeline();
        info!("Loaded project {} ({} blocks)", self.project_id, count);
        Ok(count)
    }

    pub async fn persist(&self) -> Result<()> {
        let blocks = self.store.snapshot().to_vec();
        self.documents.replace_blocks(&self.project_id, &blocks).await?;
        debug!("Persisted project {} ({} blocks)", self.project_id, blocks.len());
        Ok(())
    }

    /// Re-signs the stored artifact of a ready block. Synthesis is not rerun.
    pub async fn refresh_playback_url(&self, id: BlockId) -> Result<String> {
        let block = self.require(&id)?;
        let durable = block
            .persisted_audio_url
            .clone()
            .filter(|_| block.is_ready())
            .ok_or_else(|| EngineError::validation(format!("block {} has no stored audio", id)))?;

        let signed = self.objects.signed_url(&durable).await.map_err(|e| {
            error!("Signed URL refresh for block {} failed: {}", id, e);
            EngineError::storage(format!("link expired, please reload ({})", e))
        })?;

        self.store.apply(BlockDelta::AudioRefRefreshed {
            id,
            audio_ref: signed.url.clone(),
        });
        self.sync_timeline();
        Ok(signed.url)
    }

    // --- Editing ---------------------------------------------------------

    pub fn add_block(&self, content: RichContent, voice_id: Option<String>) -> BlockId {
        self.insert_block(content, voice_id, None)
    }

    pub fn insert_block(&self, content: RichContent, voice_id: Option<String>, index: Option<usize>) -> BlockId {
        let block = Block::new(content, voice_id);
        let id = block.id;
        self.store.apply(BlockDelta::Inserted { block, index });
        id
    }

    /// Generation state is left alone; `Block::is_stale` reports the drift.
    pub fn update_text(&self, id: BlockId, content: RichContent) -> Result<()> {
        self.require(&id)?;
        self.store.apply(BlockDelta::ContentEdited { id, content });
        Ok(())
    }

    pub fn set_voice(&self, id: BlockId, voice_id: Option<String>) -> Result<()> {
        self.require(&id)?;
        self.store.apply(BlockDelta::VoiceChanged { id, voice_id });
        Ok(())
    }

    pub fn set_diacritics(&self, id: BlockId, enabled: bool) -> Result<()> {
        self.require(&id)?;
        self.store.apply(BlockDelta::DiacriticsChanged { id, enabled });
        Ok(())
    }

    pub fn move_block(&self, id: BlockId, to: usize) -> Result<Vec<PlaybackEffect>> {
        self.require(&id)?;
        self.store.apply(BlockDelta::Moved { id, to });
        Ok(self.sync_timeline())
    }

    /// Drops the block and its segment. An outstanding job is cancelled.
    pub fn remove_block(&self, id: BlockId) -> Result<Vec<PlaybackEffect>> {
        self.require(&id)?;

        let mut effects = {
            let mut engine = self.engine();
            if engine.timeline().index_of(&id).is_some() {
                engine.delete_segment(&id)?.1
            } else {
                Vec::new()
            }
        };
        let (before, _) = self.store.apply_from(BlockDelta::Removed(id));

        // Cancel only after the removal: a job accepted meanwhile either finds
        // its block gone or has registered a token by now.
        if let Some(removed) = before.get(&id).filter(|b| b.generation_state.in_flight()) {
            if let Some(job_id) = removed.job_id.as_deref() {
                self.generator.cancel_job(job_id);
            }
        }
        effects.extend(self.sync_timeline());
        Ok(effects)
    }

    // --- Generation ------------------------------------------------------

    /// Submits every idle or failed block that has text, all at once, and
    /// waits for each to settle. A block missing its voice fails on its own
    /// without a network call; no block's failure affects another's.
    pub async fn generate_all(&self) -> GenerationReport {
        let candidates: Vec<BlockId> = self
            .store
            .snapshot()
            .ordered()
            .filter(|b| b.is_eligible())
            .filter(|b| matches!(b.generation_state, GenerationState::Idle | GenerationState::Failed))
            .map(|b| b.id)
            .collect();
        self.generate(candidates).await
    }

    pub async fn generate(&self, ids: Vec<BlockId>) -> GenerationReport {
        info!("Generating {} blocks", ids.len());
        let mut tasks = JoinSet::new();
        for id in ids.iter().copied() {
            let generator = self.generator.clone();
            tasks.spawn(async move { generator.submit(id).await });
        }

        let mut report = GenerationReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(GenerationOutcome::Ready { block_id, .. }) => report.succeeded.push(block_id),
                Ok(GenerationOutcome::Failed { block_id, failure }) => report.failed.push((block_id, failure)),
                Err(e) => error!("Generation task aborted: {}", e),
            }
        }

        // Keep the report in block order regardless of completion order.
        let list = self.store.snapshot();
        let rank = |id: &BlockId| list.position(id).unwrap_or(usize::MAX);
        report.succeeded.sort_by_key(rank);
        report.failed.sort_by_key(|(id, _)| rank(id));

        self.sync_timeline();
        info!(
            "Generation finished: {} ready, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        report
    }

    /// Explicit retry: Ready or Failed back to Idle, then submit.
    pub async fn regenerate(&self, id: BlockId) -> Result<GenerationOutcome> {
        let block = self.require(&id)?;
        if block.generation_state.in_flight() {
            return Err(EngineError::validation(format!("block {} is already generating", id)));
        }
        self.store.apply(BlockDelta::ResetToIdle(id));
        let outcome = self.generator.submit(id).await;
        self.sync_timeline();
        Ok(outcome)
    }

    /// Cancels every outstanding job. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        self.generator.cancellations().cancel_all()
    }

    // --- Timeline --------------------------------------------------------

    pub fn timeline(&self) -> Timeline {
        self.engine().timeline().clone()
    }

    pub fn total_duration(&self) -> f64 {
        self.engine().total_duration()
    }

    pub fn playhead(&self) -> f64 {
        self.engine().playhead()
    }

    pub fn is_playing(&self) -> bool {
        self.engine().is_playing()
    }

    pub fn play(&self) -> Vec<PlaybackEffect> {
        self.engine().play()
    }

    pub fn pause(&self) -> Vec<PlaybackEffect> {
        self.engine().pause()
    }

    pub fn toggle(&self) -> Vec<PlaybackEffect> {
        self.engine().toggle()
    }

    pub fn seek(&self, global_time: f64) -> Vec<PlaybackEffect> {
        self.engine().seek(global_time)
    }

    pub fn on_segment_boundary(&self) -> Vec<PlaybackEffect> {
        self.engine().on_segment_boundary()
    }

    pub fn tick(&self, raw_position: f64) -> (PlaybackProgress, Vec<PlaybackEffect>) {
        self.engine().tick(raw_position)
    }

    pub fn trim(&self, id: BlockId, start: f64, end: f64) -> Result<(Trim, Vec<PlaybackEffect>)> {
        // Engine and block list change under one guard so a concurrent
        // rebuild never sees the old trim.
        let mut engine = self.engine();
        let (trim, effects) = engine.apply_trim(&id, start, end)?;
        self.store.apply(BlockDelta::Trimmed { id, trim });
        Ok((trim, effects))
    }

    /// Recomputes the timeline from the current block list.
    pub fn sync_timeline(&self) -> Vec<PlaybackEffect> {
        let mut engine = self.engine();
        let timeline = Timeline::from_blocks(&self.store.snapshot());
        engine.rebuild(timeline)
    }

    // --- Waveform & export -----------------------------------------------

    /// Envelope for a ready block. Falls back to a placeholder when the
    /// artifact cannot be fetched or decoded.
    pub async fn waveform(&self, id: BlockId) -> Result<Waveform> {
        let block = self.require(&id)?;
        let job_id = block
            .ready_job_id()
            .ok_or_else(|| EngineError::validation(format!("block {} has no audio yet", id)))?
            .to_string();
        let fetched = self.provider.fetch_result(&job_id).await;
        Ok(self.sampler.sample_fetched(fetched))
    }

    /// Job ids of ready blocks in timeline order.
    pub fn export_job_ids(&self) -> Vec<String> {
        self.engine().timeline().job_ids()
    }

    pub async fn export(&self) -> Result<ExportArtifact> {
        let job_ids = self.export_job_ids();
        if job_ids.is_empty() {
            return Err(EngineError::merge("no generated audio to export"));
        }
        let artifact = self.merger.merge(&job_ids).await?;
        for warning in artifact.warnings() {
            warn!("{}", warning);
        }
        Ok(artifact)
    }

    pub async fn export_jobs(&self, job_ids: &[String]) -> Result<ExportArtifact> {
        self.merger.merge(job_ids).await
    }

    fn require(&self, id: &BlockId) -> Result<Block> {
        self.block(id)
            .ok_or_else(|| EngineError::validation(format!("block {} does not exist", id)))
    }

    fn engine(&self) -> MutexGuard<'_, TimelineEngine> {
        // A panic while holding the lock leaves a still-consistent engine.
        self.engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
