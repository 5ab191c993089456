//! Error types for the aggregation pipeline
//!
//! Only failures that end a run live here. Per-source fetch failures and
//! per-record rejections are recovered where they happen and never surface
//! as an [`Error`].

use crate::proxy::fetcher::FetchError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal pipeline error
#[derive(Debug, Error)]
pub enum Error {
    /// An output directory could not be established before the run
    #[error("cannot prepare output directory {path}: {source}")]
    Config {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An output artifact could not be created or written
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A local scan input could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A remote scan document could not be fetched
    #[error("cannot fetch scan input {url}: {source}")]
    Remote {
        url: String,
        source: FetchError,
    },

    /// The HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl Error {
    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Name of the stage that failed, for the terminal report
    pub fn stage(&self) -> &'static str {
        match self {
            Error::Config { .. } => "setup",
            Error::Write { .. } => "write",
            Error::Read { .. } | Error::Remote { .. } => "scan",
            Error::Client(_) => "fetch",
        }
    }
}
