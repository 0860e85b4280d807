use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::trim::{SegmentTiming, Trim};
use crate::error::ErrorKind;

/// Stable block identity. Survives reorders, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub Uuid);

impl BlockId {
    pub fn new() -> Self {
        BlockId(Uuid::new_v4())
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GenerationState {
    #[default]
    Idle,
    Requesting,
    Polling,
    Ready,
    Failed,
}

impl GenerationState {
    pub fn in_flight(&self) -> bool {
        matches!(self, GenerationState::Requesting | GenerationState::Polling)
    }
}

/// Why the last attempt failed. Surfaced per block so only that block is retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFailure {
    pub kind: ErrorKind,
    pub reason: String,
}

/// Structured editor document. Only its plain text matters here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RichContent(pub Value);

impl RichContent {
    pub fn plain(text: &str) -> Self {
        RichContent(Value::String(text.to_string()))
    }

    /// Text leaves joined in document order, one line per block-level node.
    pub fn plain_text(&self) -> String {
        let mut buf = String::new();
        walk(&self.0, &mut buf);
        buf.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn walk(node: &Value, buf: &mut String) {
    match node {
        Value::String(s) => buf.push_str(s),
        Value::Array(items) => {
            for item in items {
                walk(item, buf);
            }
        }
        Value::Object(map) => {
            let kind = map.get("type").and_then(Value::as_str).unwrap_or_default();
            if kind == "hardBreak" {
                buf.push('\n');
                return;
            }
            if let Some(Value::String(text)) = map.get("text") {
                buf.push_str(text);
            }
            if let Some(children) = map.get("content") {
                walk(children, buf);
                buf.push('\n');
            }
        }
        _ => {}
    }
}

/// One text unit with its voice assignment and synthesis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: BlockId,
    pub order: u32,
    pub rich_content: RichContent,
    pub voice_id: Option<String>,
    #[serde(default)]
    pub diacritics_enabled: bool,
    #[serde(default)]
    pub generation_state: GenerationState,
    #[serde(default)]
    pub failure: Option<BlockFailure>,
    #[serde(default)]
    pub job_id: Option<String>,
    /// Session-scoped playable reference (signed URL). Never persisted.
    #[serde(default, skip_serializing)]
    pub audio_ref: Option<String>,
    #[serde(default)]
    pub persisted_audio_url: Option<String>,
    #[serde(default)]
    pub trim: Option<Trim>,
    /// Raw decoded length in seconds.
    #[serde(default)]
    pub duration: Option<f64>,
    /// Text that produced the current audio.
    #[serde(default)]
    pub synthesized_text: Option<String>,
}

impl Block {
    pub fn new(rich_content: RichContent, voice_id: Option<String>) -> Self {
        Self {
            id: BlockId::new(),
            order: 0,
            rich_content,
            voice_id,
            diacritics_enabled: false,
            generation_state: GenerationState::Idle,
            failure: None,
            job_id: None,
            audio_ref: None,
            persisted_audio_url: None,
            trim: None,
            duration: None,
            synthesized_text: None,
        }
    }

    pub fn text(&self) -> String {
        self.rich_content.plain_text()
    }

    pub fn voice(&self) -> Option<&str> {
        self.voice_id.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    /// Has text and nothing outstanding.
    pub fn is_eligible(&self) -> bool {
        !self.text().is_empty() && !self.generation_state.in_flight()
    }

    pub fn is_ready(&self) -> bool {
        self.generation_state == GenerationState::Ready
    }

    /// Trusted only while `Ready`.
    pub fn ready_job_id(&self) -> Option<&str> {
        if self.is_ready() {
            self.job_id.as_deref()
        } else {
            None
        }
    }

    /// Text was edited after the audio was produced.
    pub fn is_stale(&self) -> bool {
        match &self.synthesized_text {
            Some(spoken) => self.is_ready() && *spoken != self.text(),
            None => false,
        }
    }

    pub fn timing(&self) -> Option<SegmentTiming> {
        let raw_duration = self.duration?;
        Some(SegmentTiming {
            raw_duration,
            trim: self.trim.unwrap_or_else(|| Trim::full(raw_duration)),
        })
    }

    pub fn effective_duration(&self) -> f64 {
        self.timing()
            .map(|t| t.effective_duration())
            .unwrap_or(0.0)
    }
}
