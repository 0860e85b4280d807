use tracing::{debug, info};

use super::block::BlockId;
use super::state::BlockList;
use super::time::Tick;
use super::trim::{SegmentTiming, Trim};
use crate::error::{EngineError, Result};

/// Timeline-facing view of one `Ready` block.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub block_id: BlockId,
    pub job_id: Option<String>,
    pub audio_ref: Option<String>,
    pub timing: SegmentTiming,
}

impl Segment {
    pub fn effective_duration(&self) -> f64 {
        self.timing.effective_duration()
    }

    pub fn trim(&self) -> Trim {
        self.timing.trim
    }
}

/// Where a global instant lands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub segment_index: usize,
    /// Offset inside the trimmed window.
    pub local_time: f64,
    /// Offset inside the underlying audio resource.
    pub raw_time: f64,
}

/// Gapless concatenation of ready segments in block order. Derived, never stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    segments: Vec<Segment>,
}

impl Timeline {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            segments: segments
                .into_iter()
                .filter(|s| s.effective_duration() > 0.0)
                .collect(),
        }
    }

    pub fn from_blocks(list: &BlockList) -> Self {
        Self::new(
            list.ordered()
                .filter(|b| b.is_ready())
                .filter_map(|b| {
                    Some(Segment {
                        block_id: b.id,
                        job_id: b.job_id.clone(),
                        audio_ref: b.audio_ref.clone(),
                        timing: b.timing()?,
                    })
                })
                .collect(),
        )
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn index_of(&self, id: &BlockId) -> Option<usize> {
        self.segments.iter().position(|s| s.block_id == *id)
    }

    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(Segment::effective_duration).sum()
    }

    /// Global time at which segment `index` begins.
    pub fn offset_of(&self, index: usize) -> f64 {
        self.segments
            .iter()
            .take(index)
            .map(Segment::effective_duration)
            .sum()
    }

    /// Global -> (segment, local). Clamps into `[0, total]`; the end of the
    /// timeline maps to the end of the last segment.
    pub fn locate(&self, global_time: f64) -> Option<Position> {
        let last = self.segments.len().checked_sub(1)?;
        let end = self.total_duration();
        let global_time = if global_time.is_finite() {
            global_time.clamp(0.0, end)
        } else {
            0.0
        };

        let mut elapsed = 0.0;
        for (index, segment) in self.segments.iter().enumerate() {
            let duration = segment.effective_duration();
            let mut local_time = (global_time - elapsed).max(0.0);
            if global_time < end && (local_time < duration || index == last) {
                // Before the end of the timeline, local time stays strictly inside
                // the segment even when the subtraction rounds onto its end.
                if local_time >= duration {
                    local_time = duration - duration * f64::EPSILON;
                }
                return Some(Position {
                    segment_index: index,
                    local_time,
                    raw_time: segment.trim().to_raw(local_time),
                });
            }
            elapsed += duration;
        }

        let segment = &self.segments[last];
        let local_time = segment.effective_duration();
        Some(Position {
            segment_index: last,
            local_time,
            raw_time: segment.trim().to_raw(local_time),
        })
    }

    /// (segment, raw position) -> global.
    pub fn global_time(&self, index: usize, raw_position: f64) -> f64 {
        match self.segments.get(index) {
            Some(segment) => self.offset_of(index) + segment.trim().to_local(raw_position),
            None => self.total_duration(),
        }
    }

    /// Job ids in timeline order, for export.
    pub fn job_ids(&self) -> Vec<String> {
        self.segments
            .iter()
            .filter_map(|s| s.job_id.clone())
            .collect()
    }
}

/// Instructions for the host media element.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEffect {
    /// Point the element at a segment's audio and seek it to `raw_position`.
    Load {
        segment_index: usize,
        block_id: BlockId,
        audio_ref: Option<String>,
        raw_position: f64,
    },
    Resume,
    Pause,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackProgress {
    pub tick: Tick,
    pub global_time: f64,
    /// `global_time / total_duration`, 0 on an empty timeline.
    pub fraction: f64,
    pub segment_index: Option<usize>,
}

impl PlaybackProgress {
    /// Horizontal scroll that keeps the playhead in proportion.
    pub fn scroll_offset(&self, content_width: f64, viewport_width: f64) -> f64 {
        self.fraction * (content_width - viewport_width).max(0.0)
    }
}

/// Playhead and play flag over the current timeline. Every mutation is a
/// named transition; each returns the effects the media element must apply.
#[derive(Debug, Clone, Default)]
pub struct TimelineEngine {
    timeline: Timeline,
    playhead: f64,
    is_playing: bool,
    active: Option<usize>,
    tick: Tick,
}

impl TimelineEngine {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            ..Self::default()
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn total_duration(&self) -> f64 {
        self.timeline.total_duration()
    }

    pub fn playhead(&self) -> f64 {
        self.playhead
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn active_segment(&self) -> Option<usize> {
        self.active
    }

    pub fn position(&self) -> Option<Position> {
        self.timeline.locate(self.playhead)
    }

    /// Swap in a recomputed timeline. The playhead is kept (clamped) unless
    /// the segment under it disappeared, in which case playback stops.
    pub fn rebuild(&mut self, timeline: Timeline) -> Vec<PlaybackEffect> {
        let active_id = self
            .active
            .and_then(|i| self.timeline.segments().get(i))
            .map(|s| s.block_id);
        self.timeline = timeline;
        self.playhead = self.playhead.clamp(0.0, self.total_duration());

        match active_id.and_then(|id| self.timeline.index_of(&id)) {
            Some(index) => {
                self.active = Some(index);
                Vec::new()
            }
            None if self.is_playing => self.stop(),
            None => {
                self.active = self.position().map(|p| p.segment_index);
                Vec::new()
            }
        }
    }

    pub fn play(&mut self) -> Vec<PlaybackEffect> {
        if self.timeline.is_empty() {
            return Vec::new();
        }
        if self.playhead >= self.total_duration() {
            self.playhead = 0.0;
        }
        self.is_playing = true;
        let mut effects = self.load_at_playhead();
        effects.push(PlaybackEffect::Resume);
        effects
    }

    pub fn pause(&mut self) -> Vec<PlaybackEffect> {
        if !self.is_playing {
            return Vec::new();
        }
        self.is_playing = false;
        vec![PlaybackEffect::Pause]
    }

    pub fn toggle(&mut self) -> Vec<PlaybackEffect> {
        if self.is_playing {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Seeking implies intent to hear the result: playback always resumes.
    pub fn seek(&mut self, global_time: f64) -> Vec<PlaybackEffect> {
        if self.timeline.is_empty() {
            self.playhead = 0.0;
            return Vec::new();
        }
        self.playhead = if global_time.is_finite() {
            global_time.clamp(0.0, self.total_duration())
        } else {
            0.0
        };
        self.is_playing = true;
        let mut effects = self.load_at_playhead();
        effects.push(PlaybackEffect::Resume);
        effects
    }

    /// The active segment's raw position reached its trim end.
    pub fn on_segment_boundary(&mut self) -> Vec<PlaybackEffect> {
        let next = self.active.map(|i| i + 1).unwrap_or(0);
        if next >= self.timeline.len() {
            debug!("Reached end of timeline");
            self.playhead = self.total_duration();
            self.is_playing = false;
            self.active = self.timeline.len().checked_sub(1);
            return vec![PlaybackEffect::Stop];
        }

        self.active = Some(next);
        self.playhead = self.timeline.offset_of(next);
        let segment = &self.timeline.segments()[next];
        vec![
            PlaybackEffect::Load {
                segment_index: next,
                block_id: segment.block_id,
                audio_ref: segment.audio_ref.clone(),
                raw_position: segment.trim().start,
            },
            PlaybackEffect::Resume,
        ]
    }

    /// Animation-frame sample of the media element's native position.
    pub fn tick(&mut self, raw_position: f64) -> (PlaybackProgress, Vec<PlaybackEffect>) {
        self.tick = self.tick.next();
        let mut effects = Vec::new();

        if self.is_playing {
            if let Some(index) = self.active {
                if let Some(segment) = self.timeline.segments().get(index) {
                    if raw_position >= segment.trim().end {
                        effects = self.on_segment_boundary();
                    } else {
                        self.playhead = self.timeline.global_time(index, raw_position);
                    }
                }
            }
        }

        (self.progress(), effects)
    }

    pub fn progress(&self) -> PlaybackProgress {
        let total = self.total_duration();
        PlaybackProgress {
            tick: self.tick,
            global_time: self.playhead,
            fraction: if total > 0.0 { self.playhead / total } else { 0.0 },
            segment_index: self.active,
        }
    }

    /// Validates and installs a new trim window. Later segments shift, so the
    /// playhead returns to zero and playback stops.
    pub fn apply_trim(&mut self, segment_id: &BlockId, start: f64, end: f64) -> Result<(Trim, Vec<PlaybackEffect>)> {
        let index = self
            .timeline
            .index_of(segment_id)
            .ok_or_else(|| EngineError::validation(format!("block {} is not on the timeline", segment_id)))?;

        let mut segments = self.timeline.segments().to_vec();
        let timing = segments[index].timing.with_trim(start, end)?;
        segments[index].timing = timing;
        self.timeline = Timeline::new(segments);

        info!(
            "Trimmed {} to [{:.3}, {:.3}]; total now {:.3}s",
            segment_id,
            start,
            end,
            self.total_duration()
        );
        Ok((timing.trim, self.reset()))
    }

    /// Removes a segment; same playhead policy as trimming.
    pub fn delete_segment(&mut self, segment_id: &BlockId) -> Result<(Segment, Vec<PlaybackEffect>)> {
        let index = self
            .timeline
            .index_of(segment_id)
            .ok_or_else(|| EngineError::validation(format!("block {} is not on the timeline", segment_id)))?;

        let mut segments = self.timeline.segments().to_vec();
        let removed = segments.remove(index);
        self.timeline = Timeline::new(segments);
        info!("Deleted segment {}; total now {:.3}s", segment_id, self.total_duration());
        Ok((removed, self.reset()))
    }

    fn reset(&mut self) -> Vec<PlaybackEffect> {
        let was_playing = self.is_playing;
        self.playhead = 0.0;
        self.is_playing = false;
        self.active = if self.timeline.is_empty() { None } else { Some(0) };
        if was_playing {
            vec![PlaybackEffect::Stop]
        } else {
            Vec::new()
        }
    }

    fn stop(&mut self) -> Vec<PlaybackEffect> {
        self.is_playing = false;
        self.active = self.position().map(|p| p.segment_index);
        vec![PlaybackEffect::Stop]
    }

    fn load_at_playhead(&mut self) -> Vec<PlaybackEffect> {
        match self.timeline.locate(self.playhead) {
            Some(position) => {
                self.active = Some(position.segment_index);
                let segment = &self.timeline.segments()[position.segment_index];
                vec![PlaybackEffect::Load {
                    segment_index: position.segment_index,
                    block_id: segment.block_id,
                    audio_ref: segment.audio_ref.clone(),
                    raw_position: position.raw_time,
                }]
            }
            None => Vec::new(),
        }
    }
}
