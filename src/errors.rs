use std::path::PathBuf;
use thiserror::Error;

/// Failure of a collector at construction or scrape time.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("'{path}' does not exist or is not executable")]
    NotExecutable { path: PathBuf },

    #[error("'{path}' does not exist: {source}")]
    FileNotFound {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout_ms}ms")]
    Timeout { program: String, timeout_ms: u64 },

    #[error("{program} exited with {code:?} and no output: {stderr}")]
    ExitStatus {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {what}: {reason}")]
    Parse { what: &'static str, reason: String },

    #[error("invalid metric descriptor: {0}")]
    Metric(#[from] prometheus::Error),

    #[error("invalid output pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl CollectorError {
    pub(crate) fn parse(what: &'static str, reason: impl ToString) -> Self {
        CollectorError::Parse {
            what,
            reason: reason.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("descriptor {name} with identical constant labels is already registered")]
    Collision { name: String },

    #[error("descriptor {name} is registered with a different help, type or label set")]
    InconsistentDescriptor { name: String },

    #[error("no collector could be registered")]
    NoCollectors,

    #[error("failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),
}
