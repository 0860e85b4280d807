pub mod audio;
pub mod config;
pub mod error;
pub mod export;
pub mod kernel;
pub mod orchestrator;
pub mod services;

pub use config::AppConfig;
pub use error::{EngineError, ErrorKind, Result};
pub use kernel::block::{Block, BlockId, GenerationState, RichContent};
pub use kernel::timeline::{PlaybackEffect, Timeline, TimelineEngine};
pub use orchestrator::{GenerationReport, Orchestrator};
