use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub poll_interval_ms: u64,
    /// Unset means poll until the provider settles.
    pub max_poll_duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub objects_dir: PathBuf,
    pub documents_dir: PathBuf,
    pub public_base_url: String,
    pub signed_url_ttl_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformConfig {
    pub resolution: usize,
    pub min_selection_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcatBackend {
    Wav,
    Ffmpeg,
}

/// Container of the merged export. The WAV backend always writes `Wav`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Wav,
    Mp3,
    Ogg,
    Flac,
    M4a,
}

impl ContainerFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Wav => "wav",
            ContainerFormat::Mp3 => "mp3",
            ContainerFormat::Ogg => "ogg",
            ContainerFormat::Flac => "flac",
            ContainerFormat::M4a => "m4a",
        }
    }

    /// ffmpeg muxer name for `-f`.
    pub fn muxer(&self) -> &'static str {
        match self {
            ContainerFormat::M4a => "ipod",
            other => other.extension(),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ContainerFormat::Wav => "audio/wav",
            ContainerFormat::Mp3 => "audio/mpeg",
            ContainerFormat::Ogg => "audio/ogg",
            ContainerFormat::Flac => "audio/flac",
            ContainerFormat::M4a => "audio/mp4",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    pub work_dir: PathBuf,
    pub backend: ConcatBackend,
    pub ffmpeg_path: PathBuf,
    /// Container the ffmpeg backend writes. Must match the provider's artifacts.
    pub ffmpeg_format: ContainerFormat,
    /// Download name; the extension follows the container.
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub log_level: String,
    pub data_dir: PathBuf,
    pub provider: ProviderConfig,
    pub generation: GenerationConfig,
    pub storage: StorageConfig,
    pub waveform: WaveformConfig,
    pub export: ExportConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090/v1".to_string(),
            api_key: None,
            request_timeout_ms: 30_000,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1500,
            max_poll_duration_ms: None,
        }
    }
}

impl GenerationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_duration(&self) -> Option<Duration> {
        self.max_poll_duration_ms.map(Duration::from_millis)
    }
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            resolution: 300,
            min_selection_secs: 0.1,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::with_data_dir(
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("narrator"),
        )
    }
}

impl AppConfig {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            log_level: "info".to_string(),
            provider: ProviderConfig::default(),
            generation: GenerationConfig::default(),
            storage: StorageConfig {
                objects_dir: data_dir.join("objects"),
                documents_dir: data_dir.join("projects"),
                public_base_url: "file://".to_string() + &data_dir.join("objects").to_string_lossy(),
                signed_url_ttl_secs: 3600,
            },
            waveform: WaveformConfig::default(),
            export: ExportConfig {
                work_dir: env::temp_dir(),
                backend: ConcatBackend::Wav,
                ffmpeg_path: PathBuf::from("ffmpeg"),
                ffmpeg_format: ContainerFormat::Mp3,
                file_name: "narration".to_string(),
            },
            data_dir,
        }
    }

    /// Defaults, then the TOML file if present, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                config = toml::from_str(&content)
                    .map_err(|e| EngineError::config(format!("failed to parse {}: {}", path.display(), e)))?;
            }
        }

        if let Ok(data_dir) = env::var("NARRATOR_DATA_DIR") {
            let overridden = Self::with_data_dir(PathBuf::from(data_dir));
            config.storage = overridden.storage;
            config.data_dir = overridden.data_dir;
        }

        if let Ok(url) = env::var("NARRATOR_PROVIDER_URL") {
            config.provider.base_url = url;
        }

        if let Ok(key) = env::var("NARRATOR_API_KEY") {
            config.provider.api_key = Some(key);
        }

        if let Ok(level) = env::var("NARRATOR_LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.generation.poll_interval_ms == 0 {
            return Err(EngineError::config("generation.poll_interval_ms must be positive"));
        }
        if self.waveform.resolution == 0 {
            return Err(EngineError::config("waveform.resolution must be positive"));
        }
        if self.waveform.min_selection_secs <= 0.0 {
            return Err(EngineError::config("waveform.min_selection_secs must be positive"));
        }
        Ok(())
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.storage.objects_dir)?;
        std::fs::create_dir_all(&self.storage.documents_dir)?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
