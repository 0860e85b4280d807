use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of an engine failure. Carried on failed blocks so the
/// caller can tell "retry later" apart from "fix your input".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    Provider,
    Transport,
    Decode,
    Storage,
    Merge,
    Timeout,
    Cancelled,
    Internal,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("provider error: {message}")]
    Provider { status: Option<u16>, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("merge error: {0}")]
    Merge(String),

    #[error("timed out after {waited_ms}ms waiting for job {job_id}")]
    Timeout { job_id: String, waited_ms: u64 },

    #[error("job {0} was cancelled")]
    Cancelled(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn provider<T: Into<String>>(status: Option<u16>, msg: T) -> Self {
        EngineError::Provider {
            status,
            message: msg.into(),
        }
    }

    pub fn transport<T: Into<String>>(msg: T) -> Self {
        EngineError::Transport(msg.into())
    }

    pub fn decode<T: Into<String>>(msg: T) -> Self {
        EngineError::Decode(msg.into())
    }

    pub fn storage<T: Into<String>>(msg: T) -> Self {
        EngineError::Storage(msg.into())
    }

    pub fn merge<T: Into<String>>(msg: T) -> Self {
        EngineError::Merge(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        EngineError::Config(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Provider { .. } => ErrorKind::Provider,
            EngineError::Transport(_) => ErrorKind::Transport,
            EngineError::Decode(_) => ErrorKind::Decode,
            EngineError::Storage(_) => ErrorKind::Storage,
            EngineError::Merge(_) => ErrorKind::Merge,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::Cancelled(_) => ErrorKind::Cancelled,
            EngineError::Config(_) | EngineError::Io(_) | EngineError::Json(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => EngineError::provider(Some(status.as_u16()), e.to_string()),
            None => EngineError::transport(e.to_string()),
        }
    }
}

impl From<hound::Error> for EngineError {
    fn from(e: hound::Error) -> Self {
        EngineError::decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
