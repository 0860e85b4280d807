use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_id: String,
    pub diacritics: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

/// The asynchronous job contract of a speech-synthesis vendor:
/// submit, poll, fetch.
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    async fn create_job(&self, request: &SynthesisRequest) -> Result<String>;

    async fn get_status(&self, job_id: &str) -> Result<JobStatus>;

    async fn fetch_result(&self, job_id: &str) -> Result<Vec<u8>>;
}

#[derive(Deserialize)]
struct CreateJobResponse {
    job_id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: JobStatus,
}

#[derive(Clone)]
pub struct HttpSynthesisClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSynthesisClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| EngineError::config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn jobs_url(&self) -> String {
        format!("{}/jobs", self.base_url)
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/jobs/{}", self.base_url, job_id)
    }

    fn result_url(&self, job_id: &str) -> String {
        format!("{}/jobs/{}/result", self.base_url, job_id)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::provider(
                Some(status.as_u16()),
                format!("synthesis server returned {}: {}", status, body.trim()),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl SynthesisProvider for HttpSynthesisClient {
    async fn create_job(&self, request: &SynthesisRequest) -> Result<String> {
        let response = self
            .send(self.client.post(self.jobs_url()).json(request))
            .await?;
        let body: CreateJobResponse = response
            .json()
            .await
            .map_err(|e| EngineError::provider(None, format!("malformed job response: {}", e)))?;
        debug!("Synthesis job {} created", body.job_id);
        Ok(body.job_id)
    }

    async fn get_status(&self, job_id: &str) -> Result<JobStatus> {
        let response = self.send(self.client.get(self.job_url(job_id))).await?;
        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| EngineError::provider(None, format!("malformed status response: {}", e)))?;
        Ok(body.status)
    }

    async fn fetch_result(&self, job_id: &str) -> Result<Vec<u8>> {
        let response = self.send(self.client.get(self.result_url(job_id))).await?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_urls_strip_trailing_slash() {
        let config = ProviderConfig {
            base_url: "http://tts.local/v1/".to_string(),
            api_key: None,
            request_timeout_ms: 1000,
        };
        let client = HttpSynthesisClient::new(&config).unwrap();
        assert_eq!(client.jobs_url(), "http://tts.local/v1/jobs");
        assert_eq!(client.job_url("j1"), "http://tts.local/v1/jobs/j1");
        assert_eq!(client.result_url("j1"), "http://tts.local/v1/jobs/j1/result");
    }

    #[test]
    fn test_status_parsing() {
        let parsed: StatusResponse = serde_json::from_str(r#"{"status":"completed"}"#).unwrap();
        assert_eq!(parsed.status, JobStatus::Completed);
        assert!(parsed.status.is_terminal());
        let pending: StatusResponse = serde_json::from_str(r#"{"status":"pending"}"#).unwrap();
        assert!(!pending.status.is_terminal());
    }
}
