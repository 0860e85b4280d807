use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::concat::Concatenator;
use crate::error::{EngineError, ErrorKind, Result};
use crate::kernel::telemetry::event::{ExportOutcomeKind, TelemetryEvent};
use crate::kernel::telemetry::recorder::SharedTelemetry;
use crate::services::synthesis::SynthesisProvider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedArtifact {
    pub job_id: String,
    pub reason: String,
}

/// The merged file, ready to stream back as an attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub included: Vec<String>,
    pub skipped: Vec<SkippedArtifact>,
}

impl ExportArtifact {
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.file_name.replace('"', ""))
    }

    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.skipped
            .iter()
            .map(|s| format!("job {} was left out: {}", s.job_id, s.reason))
            .collect()
    }
}

/// Body accepted by the export endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub job_ids: Vec<String>,
}

/// Structured failure returned by the export endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<EngineError> for ExportErrorBody {
    fn from(e: EngineError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Fetches finished artifacts by job id and joins them into one file.
/// All intermediate files live in a scratch directory removed on every exit.
#[derive(Clone)]
pub struct ExportMerger {
    provider: Arc<dyn SynthesisProvider>,
    concat: Arc<dyn Concatenator>,
    work_root: PathBuf,
    file_name: String,
    telemetry: SharedTelemetry,
}

impl ExportMerger {
    pub fn new(
        provider: Arc<dyn SynthesisProvider>,
        concat: Arc<dyn Concatenator>,
        work_root: PathBuf,
        file_name: String,
    ) -> Self {
        Self {
            provider,
            concat,
            work_root,
            file_name,
            telemetry: SharedTelemetry::new(),
        }
    }

    pub fn with_telemetry(mut self, telemetry: SharedTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    fn download_name(&self, extension: &str) -> String {
        Path::new(&self.file_name)
            .with_extension(extension)
            .to_string_lossy()
            .into_owned()
    }

    /// Endpoint form of `merge`.
    pub async fn handle(&self, request: ExportRequest) -> std::result::Result<ExportArtifact, ExportErrorBody> {
        self.merge(&request.job_ids).await.map_err(ExportErrorBody::from)
    }

    /// Best effort: an artifact that cannot be fetched is logged and left out.
    /// Fails only when nothing could be fetched or the join itself fails.
    pub async fn merge(&self, job_ids: &[String]) -> Result<ExportArtifact> {
        let started = Instant::now();
        let result = self.merge_inner(job_ids).await;

        let (included, outcome) = match &result {
            Ok(artifact) if artifact.is_partial() => (artifact.included.len(), ExportOutcomeKind::Partial),
            Ok(artifact) => (artifact.included.len(), ExportOutcomeKind::Complete),
            Err(_) => (0, ExportOutcomeKind::Failed),
        };
        self.telemetry.record(TelemetryEvent::Export {
            requested: job_ids.len(),
            included,
            elapsed_ms: started.elapsed().as_millis() as u64,
            outcome,
        });
        result
    }

    async fn merge_inner(&self, job_ids: &[String]) -> Result<ExportArtifact> {
        if job_ids.is_empty() {
            return Err(EngineError::merge("no jobs selected for export"));
        }

        tokio::fs::create_dir_all(&self.work_root)
            .await
            .map_err(|e| EngineError::merge(format!("work dir {}: {}", self.work_root.display(), e)))?;
        let work = tempfile::Builder::new()
            .prefix("export-")
            .tempdir_in(&self.work_root)
            .map_err(|e| EngineError::merge(format!("scratch dir: {}", e)))?;
        debug!("Export scratch dir {}", work.path().display());

        let mut fetches = JoinSet::new();
        for (index, job_id) in job_ids.iter().enumerate() {
            let provider = self.provider.clone();
            let job_id = job_id.clone();
            fetches.spawn(async move {
                let fetched = provider.fetch_result(&job_id).await;
                (index, job_id, fetched)
            });
        }

        let mut fetched = Vec::with_capacity(job_ids.len());
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok(entry) => fetched.push(entry),
                Err(e) => warn!("Artifact fetch task aborted: {}", e),
            }
        }
        fetched.sort_by_key(|(index, _, _)| *index);

        let mut inputs = Vec::new();
        let mut included = Vec::new();
        let mut skipped = Vec::new();
        for (index, job_id, result) in fetched {
            let bytes = match result {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping job {} in export: {}", job_id, e);
                    skipped.push(SkippedArtifact {
                        job_id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let path = work.path().join(format!("{:04}.part", index));
            if let Err(e) = tokio::fs::write(&path, &bytes).await {
                warn!("Skipping job {} in export, could not stage it: {}", job_id, e);
                skipped.push(SkippedArtifact {
                    job_id,
                    reason: e.to_string(),
                });
                continue;
            }
            inputs.push(path);
            included.push(job_id);
        }

        // Jobs whose fetch task vanished are reported too.
        for job_id in job_ids {
            let accounted = included.contains(job_id) || skipped.iter().any(|s| &s.job_id == job_id);
            if !accounted {
                skipped.push(SkippedArtifact {
                    job_id: job_id.clone(),
                    reason: "fetch task aborted".to_string(),
                });
            }
        }

        if inputs.is_empty() {
            return Err(EngineError::merge(format!(
                "none of the {} artifacts could be retrieved",
                job_ids.len()
            )));
        }

        let format = self.concat.format();
        let output = work.path().join(format!("merged.{}", format.extension()));
        let concat = self.concat.clone();
        let output_path = output.clone();
        tokio::task::spawn_blocking(move || concat.concat(&inputs, &output_path))
            .await
            .map_err(|e| EngineError::merge(format!("merge worker failed: {}", e)))??;

        let bytes = tokio::fs::read(&output)
            .await
            .map_err(|e| EngineError::merge(format!("read merged output: {}", e)))?;

        if let Err(e) = work.close() {
            warn!("Could not remove export scratch dir: {}", e);
        }

        info!(
            "Exported {} of {} artifacts ({} bytes)",
            included.len(),
            job_ids.len(),
            bytes.len()
        );
        Ok(ExportArtifact {
            file_name: self.download_name(format.extension()),
            content_type: format.content_type().to_string(),
            bytes,
            included,
            skipped,
        })
    }
}
