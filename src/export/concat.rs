use hound::{SampleFormat, WavReader, WavWriter};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::debug;

use crate::config::{ConcatBackend, ContainerFormat, ExportConfig};
use crate::error::{EngineError, Result};

/// Joins already-encoded artifacts in order without re-encoding.
/// Blocking; callers run it off the async runtime.
pub trait Concatenator: Send + Sync {
    fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;

    fn format(&self) -> ContainerFormat;
}

pub fn from_config(config: &ExportConfig) -> Arc<dyn Concatenator> {
    match config.backend {
        ConcatBackend::Wav => Arc::new(WavConcatenator),
        ConcatBackend::Ffmpeg => Arc::new(FfmpegConcatenator::new(
            config.ffmpeg_path.clone(),
            config.ffmpeg_format,
        )),
    }
}

/// PCM sample copy between WAV files sharing one spec.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavConcatenator;

impl Concatenator for WavConcatenator {
    fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let first = inputs
            .first()
            .ok_or_else(|| EngineError::merge("nothing to concatenate"))?;
        let spec = WavReader::open(first)
            .map_err(|e| EngineError::merge(format!("{}: {}", first.display(), e)))?
            .spec();

        let mut writer = WavWriter::create(output, spec)
            .map_err(|e| EngineError::merge(format!("create {}: {}", output.display(), e)))?;

        for input in inputs {
            let mut reader = WavReader::open(input)
                .map_err(|e| EngineError::merge(format!("{}: {}", input.display(), e)))?;
            if reader.spec() != spec {
                return Err(EngineError::merge(format!(
                    "{} has format {:?}, expected {:?}",
                    input.display(),
                    reader.spec(),
                    spec
                )));
            }
            match spec.sample_format {
                SampleFormat::Float => {
                    for sample in reader.samples::<f32>() {
                        writer
                            .write_sample(sample.map_err(|e| EngineError::merge(e.to_string()))?)
                            .map_err(|e| EngineError::merge(e.to_string()))?;
                    }
                }
                SampleFormat::Int => {
                    for sample in reader.samples::<i32>() {
                        writer
                            .write_sample(sample.map_err(|e| EngineError::merge(e.to_string()))?)
                            .map_err(|e| EngineError::merge(e.to_string()))?;
                    }
                }
            }
            debug!("Appended {}", input.display());
        }

        writer
            .finalize()
            .map_err(|e| EngineError::merge(format!("finalize {}: {}", output.display(), e)))
    }

    fn format(&self) -> ContainerFormat {
        ContainerFormat::Wav
    }
}

/// `ffmpeg -f concat -c copy`: stream copy, any container ffmpeg can demux.
#[derive(Debug, Clone)]
pub struct FfmpegConcatenator {
    binary: PathBuf,
    format: ContainerFormat,
}

impl FfmpegConcatenator {
    pub fn new(binary: PathBuf, format: ContainerFormat) -> Self {
        Self { binary, format }
    }

    fn write_list(inputs: &[PathBuf], list: &Path) -> Result<()> {
        let mut file = BufWriter::new(File::create(list)?);
        for input in inputs {
            let escaped = input.to_string_lossy().replace('\'', r"'\''");
            writeln!(file, "file '{}'", escaped)?;
        }
        file.flush()?;
        Ok(())
    }
}

impl Concatenator for FfmpegConcatenator {
    fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        if inputs.is_empty() {
            return Err(EngineError::merge("nothing to concatenate"));
        }
        let list = output.with_extension("list.txt");
        Self::write_list(inputs, &list)?;

        let result = Command::new(&self.binary)
            .args(["-hide_banner", "-loglevel", "error", "-y", "-f", "concat", "-safe", "0", "-i"])
            .arg(&list)
            .args(["-c", "copy", "-f", self.format.muxer()])
            .arg(output)
            .output()
            .map_err(|e| EngineError::merge(format!("could not run {}: {}", self.binary.display(), e)))?;

        if !result.status.success() {
            return Err(EngineError::merge(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }
        Ok(())
    }

    fn format(&self) -> ContainerFormat {
        self.format
    }
}
