use std::time::Duration;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::{EngineError, Result};
use crate::services::synthesis::{JobStatus, SynthesisProvider};

/// Fixed-cadence status recheck for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecheckScheduler {
    pub interval: Duration,
    /// `None` rechecks until the provider settles.
    pub deadline: Option<Duration>,
}

impl RecheckScheduler {
    pub fn new(interval: Duration, deadline: Option<Duration>) -> Self {
        Self { interval, deadline }
    }

    pub fn from_config(config: &GenerationConfig) -> Self {
        Self::new(config.poll_interval(), config.max_poll_duration())
    }

    /// Rechecks `job_id` until it is `Completed` or `Failed`. Status errors
    /// end the loop; so do cancellation and the optional deadline.
    pub async fn run(
        &self,
        provider: &dyn SynthesisProvider,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<JobStatus> {
        let started = Instant::now();
        let mut cadence = interval(self.interval);
        cadence.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; the job was only just submitted.
        cadence.tick().await;

        let mut attempts: u64 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Recheck for job {} cancelled after {} attempts", job_id, attempts);
                    return Err(EngineError::Cancelled(job_id.to_string()));
                }
                _ = cadence.tick() => {}
            }

            if let Some(deadline) = self.deadline {
                let waited = started.elapsed();
                if waited >= deadline {
                    warn!("Job {} still pending after {:?}", job_id, waited);
                    return Err(EngineError::Timeout {
                        job_id: job_id.to_string(),
                        waited_ms: waited.as_millis() as u64,
                    });
                }
            }

            attempts += 1;
            let status = provider.get_status(job_id).await?;
            debug!("Job {} status {:?} (attempt {})", job_id, status, attempts);
            if status.is_terminal() {
                return Ok(status);
            }
        }
    }
}
