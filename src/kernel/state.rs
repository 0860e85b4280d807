use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use super::block::{Block, BlockFailure, BlockId, GenerationState, RichContent};
use super::trim::Trim;

/// Strict block delta. This is the ONLY way the block list changes.
#[derive(Debug, Clone)]
pub enum BlockDelta {
    /// Whole-list replacement (project load).
    Replaced(Vec<Block>),
    Inserted { block: Block, index: Option<usize> },
    Removed(BlockId),
    Moved { id: BlockId, to: usize },
    ContentEdited { id: BlockId, content: RichContent },
    VoiceChanged { id: BlockId, voice_id: Option<String> },
    DiacriticsChanged { id: BlockId, enabled: bool },
    GenerationRequested(BlockId),
    JobAccepted { id: BlockId, job_id: String },
    GenerationSucceeded {
        id: BlockId,
        job_id: String,
        audio_ref: String,
        persisted_url: String,
        duration: f64,
        text: String,
    },
    GenerationFailed { id: BlockId, failure: BlockFailure },
    ResetToIdle(BlockId),
    Trimmed { id: BlockId, trim: Trim },
    AudioRefRefreshed { id: BlockId, audio_ref: String },
}

impl BlockDelta {
    pub fn target(&self) -> Option<BlockId> {
        match self {
            BlockDelta::Replaced(_) => None,
            BlockDelta::Inserted { block, .. } => Some(block.id),
            BlockDelta::Removed(id)
            | BlockDelta::Moved { id, .. }
            | BlockDelta::ContentEdited { id, .. }
            | BlockDelta::VoiceChanged { id, .. }
            | BlockDelta::DiacriticsChanged { id, .. }
            | BlockDelta::GenerationRequested(id)
            | BlockDelta::JobAccepted { id, .. }
            | BlockDelta::GenerationSucceeded { id, .. }
            | BlockDelta::GenerationFailed { id, .. }
            | BlockDelta::ResetToIdle(id)
            | BlockDelta::Trimmed { id, .. }
            | BlockDelta::AudioRefRefreshed { id, .. } => Some(*id),
        }
    }
}

/// Blocks keyed by id plus their sequence. `order` on each block mirrors
/// its index in `sequence` after every structural change.
#[derive(Debug, Clone, Default)]
pub struct BlockList {
    blocks: HashMap<BlockId, Block>,
    sequence: Vec<BlockId>,
    pub version: u64,
}

impl BlockList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks(mut blocks: Vec<Block>) -> Self {
        let mut list = Self::new();
        blocks.sort_by_key(|b| b.order);
        for block in blocks {
            list.sequence.push(block.id);
            list.blocks.insert(block.id, block);
        }
        list.renumber();
        list
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn position(&self, id: &BlockId) -> Option<usize> {
        self.sequence.iter().position(|b| b == id)
    }

    /// Blocks in timeline order.
    pub fn ordered(&self) -> impl Iterator<Item = &Block> + '_ {
        self.sequence.iter().filter_map(|id| self.blocks.get(id))
    }

    pub fn to_vec(&self) -> Vec<Block> {
        self.ordered().cloned().collect()
    }

    /// Copy-on-write: returns the successor list, leaves `self` untouched.
    pub fn apply(&self, delta: BlockDelta) -> BlockList {
        let mut next = self.clone();
        next.reduce(delta);
        next
    }

    /// Pure reduction: List + Delta -> Mutated List.
    /// Deltas addressed to an unknown id are dropped.
    pub fn reduce(&mut self, delta: BlockDelta) {
        self.version += 1;

        if let Some(id) = delta.target() {
            let known = self.blocks.contains_key(&id);
            let inserting = matches!(delta, BlockDelta::Inserted { .. });
            if known == inserting {
                debug!("Dropping delta for block {}: {:?}", id, discriminant_name(&delta));
                return;
            }
        }

        match delta {
            BlockDelta::Replaced(blocks) => {
                let version = self.version;
                *self = BlockList::from_blocks(blocks);
                self.version = version;
            }
            BlockDelta::Inserted { block, index } => {
                let at = index.unwrap_or(self.sequence.len()).min(self.sequence.len());
                self.sequence.insert(at, block.id);
                self.blocks.insert(block.id, block);
                self.renumber();
            }
            BlockDelta::Removed(id) => {
                self.sequence.retain(|b| *b != id);
                self.blocks.remove(&id);
                self.renumber();
            }
            BlockDelta::Moved { id, to } => {
                if let Some(from) = self.position(&id) {
                    self.sequence.remove(from);
                    let to = to.min(self.sequence.len());
                    self.sequence.insert(to, id);
                    self.renumber();
                }
            }
            BlockDelta::ContentEdited { id, content } => {
                self.update(id, |b| b.rich_content = content);
            }
            BlockDelta::VoiceChanged { id, voice_id } => {
                self.update(id, |b| b.voice_id = voice_id);
            }
            BlockDelta::DiacriticsChanged { id, enabled } => {
                self.update(id, |b| b.diacritics_enabled = enabled);
            }
            BlockDelta::GenerationRequested(id) => {
                self.update(id, |b| {
                    if !matches!(b.generation_state, GenerationState::Idle | GenerationState::Failed) {
                        debug!("Block {} is {:?}; request ignored", id, b.generation_state);
                        return;
                    }
                    b.generation_state = GenerationState::Requesting;
                    b.failure = None;
                });
            }
            BlockDelta::JobAccepted { id, job_id } => {
                self.update(id, |b| {
                    b.generation_state = GenerationState::Polling;
                    b.job_id = Some(job_id);
                });
            }
            BlockDelta::GenerationSucceeded {
                id,
                job_id,
                audio_ref,
                persisted_url,
                duration,
                text,
            } => {
                self.update(id, |b| {
                    if b.job_id.as_deref() != Some(job_id.as_str()) {
                        debug!("Ignoring result of superseded job {} for block {}", job_id, id);
                        return;
                    }
                    b.generation_state = GenerationState::Ready;
                    b.failure = None;
                    b.audio_ref = Some(audio_ref);
                    b.persisted_audio_url = Some(persisted_url);
                    b.duration = Some(duration);
                    b.trim = Some(Trim::full(duration));
                    b.synthesized_text = Some(text);
                });
            }
            BlockDelta::GenerationFailed { id, failure } => {
                // Prior audio stays: a failed retry must not destroy a good result.
                self.update(id, |b| {
                    b.generation_state = GenerationState::Failed;
                    b.failure = Some(failure);
                });
            }
            BlockDelta::ResetToIdle(id) => {
                self.update(id, |b| {
                    if b.generation_state.in_flight() {
                        debug!("Block {} is {:?}; reset ignored", id, b.generation_state);
                        return;
                    }
                    b.generation_state = GenerationState::Idle;
                    b.failure = None;
                });
            }
            BlockDelta::Trimmed { id, trim } => {
                self.update(id, |b| b.trim = Some(trim));
            }
            BlockDelta::AudioRefRefreshed { id, audio_ref } => {
                self.update(id, |b| b.audio_ref = Some(audio_ref));
            }
        }
    }

    fn update<F: FnOnce(&mut Block)>(&mut self, id: BlockId, f: F) {
        if let Some(block) = self.blocks.get_mut(&id) {
            f(block);
        }
    }

    fn renumber(&mut self) {
        for (i, id) in self.sequence.iter().enumerate() {
            if let Some(block) = self.blocks.get_mut(id) {
                block.order = i as u32;
            }
        }
    }
}

fn discriminant_name(delta: &BlockDelta) -> &'static str {
    match delta {
        BlockDelta::Replaced(_) => "Replaced",
        BlockDelta::Inserted { .. } => "Inserted",
        BlockDelta::Removed(_) => "Removed",
        BlockDelta::Moved { .. } => "Moved",
        BlockDelta::ContentEdited { .. } => "ContentEdited",
        BlockDelta::VoiceChanged { .. } => "VoiceChanged",
        BlockDelta::DiacriticsChanged { .. } => "DiacriticsChanged",
        BlockDelta::GenerationRequested(_) => "GenerationRequested",
        BlockDelta::JobAccepted { .. } => "JobAccepted",
        BlockDelta::GenerationSucceeded { .. } => "GenerationSucceeded",
        BlockDelta::GenerationFailed { .. } => "GenerationFailed",
        BlockDelta::ResetToIdle(_) => "ResetToIdle",
        BlockDelta::Trimmed { .. } => "Trimmed",
        BlockDelta::AudioRefRefreshed { .. } => "AudioRefRefreshed",
    }
}

/// The single shared block list. Each `apply` installs a fresh snapshot by
/// one assignment; readers never see a half-applied change.
#[derive(Debug, Clone)]
pub struct BlockStore {
    tx: Arc<watch::Sender<Arc<BlockList>>>,
}

impl Default for BlockStore {
    fn default() -> Self {
        Self::new(BlockList::new())
    }
}

impl BlockStore {
    pub fn new(list: BlockList) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(list));
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Arc<BlockList> {
        self.tx.borrow().clone()
    }

    pub fn apply(&self, delta: BlockDelta) -> Arc<BlockList> {
        let mut installed = None;
        self.tx.send_modify(|current| {
            let next = Arc::new(current.apply(delta));
            installed = Some(next.clone());
            *current = next;
        });
        installed.unwrap_or_else(|| self.snapshot())
    }

    /// `apply`, also returning the snapshot the delta was reduced from.
    /// Lets a caller tell whether a guarded transition actually happened.
    pub fn apply_from(&self, delta: BlockDelta) -> (Arc<BlockList>, Arc<BlockList>) {
        let mut swapped = None;
        self.tx.send_modify(|current| {
            let next = Arc::new(current.apply(delta));
            swapped = Some((current.clone(), next.clone()));
            *current = next;
        });
        swapped.unwrap_or_else(|| (self.snapshot(), self.snapshot()))
    }

    /// Change feed for views that recompute on every new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<BlockList>> {
        self.tx.subscribe()
    }
}
