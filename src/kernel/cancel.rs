use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Live recheck loops, keyed by provider job id.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for `job_id`, created on first use.
    pub fn register(&self, job_id: &str) -> CancellationToken {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens
            .entry(job_id.to_string())
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    /// Returns false if no loop is running for `job_id`.
    pub fn cancel(&self, job_id: &str) -> bool {
        let token = {
            let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
            tokens.remove(job_id)
        };
        match token {
            Some(token) => {
                debug!("Cancelling recheck for job {}", job_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
            tokens.drain().collect()
        };
        for (_, token) in &drained {
            token.cancel();
        }
        drained.len()
    }

    /// Called when a loop settles on its own.
    pub fn release(&self, job_id: &str) {
        let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens.remove(job_id);
    }

    pub fn active(&self) -> usize {
        self.tokens.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
