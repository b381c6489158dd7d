use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the supervisor core. Core operations return these
/// without printing; formatting for the terminal happens in the CLI layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{kind} '{key}' already in use")]
    Conflict { kind: &'static str, key: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),
    #[error("failed to stop process: {0}")]
    StopFailed(String),
    #[error("corrupt state file {path}: {detail}")]
    CorruptState { path: PathBuf, detail: String },
    #[error("i/o failure on {path}: {cause}")]
    IOFailure {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },
    #[error("daemon is already running")]
    AlreadyRunning,
}

impl Error {
    pub fn conflict(kind: &'static str, key: impl Into<String>) -> Self {
        Error::Conflict {
            kind,
            key: key.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, cause: std::io::Error) -> Self {
        Error::IOFailure {
            path: path.into(),
            cause,
        }
    }

    /// Exit code convention: 1 for user errors, 2 for system errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NotFound(_)
            | Error::Conflict { .. }
            | Error::InvalidInput(_)
            | Error::AlreadyRunning => 1,
            Error::SpawnFailed(_)
            | Error::StopFailed(_)
            | Error::CorruptState { .. }
            | Error::IOFailure { .. } => 2,
        }
    }
}

/// Aggregated outcome of a bulk operation. Per-target failures are collected
/// rather than short-circuiting, keyed by the position in the iteration order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

#[derive(Debug)]
pub struct BatchFailure {
    pub index: usize,
    pub target: String,
    pub error: Error,
}

impl BatchReport {
    pub fn push_ok(&mut self, target: impl Into<String>) {
        self.succeeded.push(target.into());
    }

    pub fn push_err(&mut self, index: usize, target: impl Into<String>, error: Error) {
        self.failed.push(BatchFailure {
            index,
            target: target.into(),
            error,
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} succeeded, {} failed", self.succeeded.len(), self.failed.len())?;
        for failure in &self.failed {
            write!(f, "; [{}] {}: {}", failure.index, failure.target, failure.error)?;
        }
        Ok(())
    }
}
