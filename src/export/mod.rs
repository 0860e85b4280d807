//! Server-side join of finished synthesis artifacts into one downloadable file.

pub mod concat;
pub mod merger;

pub use merger::{ExportArtifact, ExportErrorBody, ExportMerger, ExportRequest, SkippedArtifact};
