use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::error::{EngineError, Result};
use crate::kernel::block::Block;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: String,
    pub durable_url: String,
}

/// Time-limited playback URL for a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl SignedUrl {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Durable audio artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<StoredObject>;

    /// Fresh signed URL for an object previously returned by `upload`.
    async fn signed_url(&self, durable_url: &str) -> Result<SignedUrl>;
}

/// Block lists per project.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_blocks(&self, project_id: &str) -> Result<Vec<Block>>;

    async fn replace_blocks(&self, project_id: &str, blocks: &[Block]) -> Result<()>;
}

/// Object store backed by a local directory.
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
    ttl: Duration,
}

impl LocalObjectStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            root: config.objects_dir.clone(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            ttl: Duration::seconds(config.signed_url_ttl_secs),
        }
    }

    fn key_for(&self, durable_url: &str) -> Result<String> {
        durable_url
            .strip_prefix(&self.public_base_url)
            .map(|k| k.trim_start_matches('/').to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| EngineError::storage(format!("not a stored object: {}", durable_url)))
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(EngineError::storage(format!("invalid object key: {}", key)));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<StoredObject> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::storage(format!("create {}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| EngineError::storage(format!("write {}: {}", path.display(), e)))?;
        info!("Stored {} bytes at {}", bytes.len(), key);
        Ok(StoredObject {
            key: key.to_string(),
            durable_url: format!("{}/{}", self.public_base_url, key),
        })
    }

    async fn signed_url(&self, durable_url: &str) -> Result<SignedUrl> {
        let key = self.key_for(durable_url)?;
        let path = self.path_for(&key)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(EngineError::storage(format!("object {} no longer exists", key)));
        }
        let expires_at = Utc::now() + self.ttl;
        debug!("Signed {} until {}", key, expires_at);
        Ok(SignedUrl {
            url: format!("{}?expires={}", durable_url, expires_at.timestamp()),
            expires_at,
        })
    }
}

/// One pretty JSON array per project.
pub struct FileDocumentStore {
    root: PathBuf,
}

impl FileDocumentStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, project_id: &str) -> Result<PathBuf> {
        let valid = !project_id.is_empty()
            && project_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(EngineError::validation(format!("invalid project id: {:?}", project_id)));
        }
        Ok(self.root.join(format!("{}.json", project_id)))
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn get_blocks(&self, project_id: &str) -> Result<Vec<Block>> {
        let path = self.path_for(project_id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn replace_blocks(&self, project_id: &str, blocks: &[Block]) -> Result<()> {
        let path = self.path_for(project_id)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let json = serde_json::to_string_pretty(blocks)?;
        // Write-then-rename: readers see the old list or the new one.
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, &path).await?;
        debug!("Persisted {} blocks for project {}", blocks.len(), project_id);
        Ok(())
    }
}
