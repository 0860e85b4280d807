#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use narrator::config::AppConfig;
use narrator::error::{EngineError, Result};
use narrator::kernel::block::Block;
use narrator::services::storage::{DocumentStore, ObjectStore, SignedUrl, StoredObject};
use narrator::services::synthesis::{JobStatus, SynthesisProvider, SynthesisRequest};
use narrator::Orchestrator;

pub const SAMPLE_RATE: u32 = 8_000;

/// Mono 16-bit WAV of `seconds` length, a quiet square wave.
pub fn wav_bytes(seconds: f64) -> Vec<u8> {
    wav_bytes_at(seconds, SAMPLE_RATE)
}

pub fn wav_bytes_at(seconds: f64, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let frames = (seconds * sample_rate as f64).round() as usize;
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            let sample: i16 = if (i / 20) % 2 == 0 { 4_000 } else { -4_000 };
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn wav_frames(bytes: &[u8]) -> u32 {
    hound::WavReader::new(Cursor::new(bytes)).unwrap().duration()
}

/// What the provider does with a request, keyed by its text.
#[derive(Debug, Clone)]
pub enum Script {
    /// Completes after `polls` pending answers with audio of `seconds`.
    Succeed { seconds: f64, polls: usize },
    /// `create_job` itself is rejected.
    RejectCreate,
    /// The job settles as failed.
    JobFails,
    /// The job never leaves pending.
    Hang,
}

#[derive(Debug, Clone)]
struct Job {
    script: Script,
    polls: usize,
}

/// In-memory provider. Unknown texts succeed with one second of audio.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, Script>>,
    jobs: Mutex<HashMap<String, Job>>,
    artifacts: Mutex<HashMap<String, Vec<u8>>>,
    broken_fetches: Mutex<HashSet<String>>,
    create_delay: Mutex<Option<std::time::Duration>>,
    pub create_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    next_job: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, text: &str, script: Script) {
        self.scripts.lock().unwrap().insert(text.to_string(), script);
    }

    pub fn succeed(&self, text: &str, seconds: f64) {
        self.script(text, Script::Succeed { seconds, polls: 1 });
    }

    /// A finished job that only the export path will ever touch.
    pub fn insert_artifact(&self, job_id: &str, bytes: Vec<u8>) {
        self.artifacts.lock().unwrap().insert(job_id.to_string(), bytes);
    }

    pub fn break_fetch(&self, job_id: &str) {
        self.broken_fetches.lock().unwrap().insert(job_id.to_string());
    }

    /// Holds every `create_job` answer back, keeping blocks in `Requesting`.
    pub fn slow_create(&self, delay: std::time::Duration) {
        *self.create_delay.lock().unwrap() = Some(delay);
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SynthesisProvider for ScriptedProvider {
    async fn create_job(&self, request: &SynthesisRequest) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&request.text)
            .cloned()
            .unwrap_or(Script::Succeed { seconds: 1.0, polls: 1 });

        if let Script::RejectCreate = script {
            return Err(EngineError::provider(Some(422), format!("voice {} refused", request.voice_id)));
        }

        let n = self.next_job.fetch_add(1, Ordering::SeqCst);
        let job_id = format!("job-{}", n);
        if let Script::Succeed { seconds, .. } = script {
            self.artifacts.lock().unwrap().insert(job_id.clone(), wav_bytes(seconds));
        }
        self.jobs.lock().unwrap().insert(job_id.clone(), Job { script, polls: 0 });
        Ok(job_id)
    }

    async fn get_status(&self, job_id: &str) -> Result<JobStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| EngineError::provider(Some(404), format!("unknown job {}", job_id)))?;
        job.polls += 1;
        Ok(match job.script {
            Script::Succeed { polls, .. } if job.polls > polls => JobStatus::Completed,
            Script::Succeed { .. } | Script::Hang => JobStatus::Pending,
            Script::JobFails => JobStatus::Failed,
            Script::RejectCreate => JobStatus::Failed,
        })
    }

    async fn fetch_result(&self, job_id: &str) -> Result<Vec<u8>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.broken_fetches.lock().unwrap().contains(job_id) {
            return Err(EngineError::provider(Some(500), format!("artifact {} unavailable", job_id)));
        }
        self.artifacts
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| EngineError::provider(Some(404), format!("no result for {}", job_id)))
    }
}

/// Object store kept in memory. `expire_all` makes every refresh fail.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    expired: Mutex<bool>,
}

impl MemoryObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn expire_all(&self) {
        *self.expired.lock().unwrap() = true;
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<StoredObject> {
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(StoredObject {
            key: key.to_string(),
            durable_url: format!("mem://{}", key),
        })
    }

    async fn signed_url(&self, durable_url: &str) -> Result<SignedUrl> {
        if *self.expired.lock().unwrap() {
            return Err(EngineError::storage("signing key rotated"));
        }
        let key = durable_url.trim_start_matches("mem://");
        if !self.objects.lock().unwrap().contains_key(key) {
            return Err(EngineError::storage(format!("no object {}", key)));
        }
        Ok(SignedUrl {
            url: format!("{}?sig=test", durable_url),
            expires_at: Utc::now() + Duration::minutes(5),
        })
    }
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    projects: Mutex<HashMap<String, Vec<Block>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_blocks(&self, project_id: &str) -> Result<Vec<Block>> {
        Ok(self
            .projects
            .lock()
            .unwrap()
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_blocks(&self, project_id: &str, blocks: &[Block]) -> Result<()> {
        self.projects
            .lock()
            .unwrap()
            .insert(project_id.to_string(), blocks.to_vec());
        Ok(())
    }
}

/// Config rooted in a temp dir with a fast recheck cadence.
pub fn test_config(root: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::with_data_dir(root.to_path_buf());
    config.generation.poll_interval_ms = 5;
    config.generation.max_poll_duration_ms = Some(2_000);
    config.export.work_dir = root.join("work");
    config
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub provider: Arc<ScriptedProvider>,
    pub objects: Arc<MemoryObjectStore>,
    pub documents: Arc<MemoryDocumentStore>,
    pub orchestrator: Orchestrator,
}

pub fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new();
    let objects = MemoryObjectStore::new();
    let documents = MemoryDocumentStore::new();
    let orchestrator = Orchestrator::new(
        "demo",
        &test_config(dir.path()),
        provider.clone(),
        objects.clone(),
        documents.clone(),
    );
    Harness {
        dir,
        provider,
        objects,
        documents,
        orchestrator,
    }
}
