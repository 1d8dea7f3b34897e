use rusqlite;
use std::env;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecapError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("not a tracked project: {path} has no usable version-control history")]
    NotATrackedProject { path: PathBuf },
    #[error("store corrupt at {path}: {detail}")]
    StoreCorrupt { path: PathBuf, detail: String },
    #[error("duplicate capsule id {id} in store {path}")]
    DuplicateId { path: PathBuf, id: u64 },
    #[error("summarization unavailable: {0}")]
    SummarizationUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("discovery incomplete: {0}")]
    DiscoveryPartial(String),
    #[error("environment variable error: {0}")]
    EnvVarError(#[from] env::VarError),
    #[error("validation error: {0}")]
    ValidationError(String),
}

impl RecapError {
    /// Exit code for this error kind. The CLI contract requires the kind to
    /// be distinguishable from the exit code alone.
    pub fn exit_code(&self) -> i32 {
        match self {
            RecapError::NotATrackedProject { .. } => 2,
            RecapError::StoreCorrupt { .. } => 3,
            RecapError::DuplicateId { .. } => 4,
            RecapError::SummarizationUnavailable(_) => 5,
            RecapError::NotFound(_) => 6,
            RecapError::DiscoveryPartial(_) => 7,
            _ => 1,
        }
    }
}
