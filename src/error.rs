use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while triaging a folder.
///
/// Only `FolderInvalid` and `NotFound` end a session; the rest are reported
/// per pair and the session keeps running.
#[derive(Debug, Error)]
pub enum SortError {
    #[error("not a usable folder: {path:?} ({reason})")]
    FolderInvalid { path: PathBuf, reason: String },

    #[error("{0}")]
    NotFound(String),

    #[error("cannot decode {path:?}: {reason}")]
    DecodeFailure { path: PathBuf, reason: String },

    #[error("destination already exists: {0:?}")]
    MoveConflict(PathBuf),

    #[error("failed to move {path:?}: {source}")]
    MoveIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("load queue full ({capacity} pending results)")]
    QueueOverflow { capacity: usize },

    #[error("no pair selected")]
    NoCurrentPair,

    #[error("viewer is closed")]
    Closed,

    #[error("failed to launch player for {path:?}: {reason}")]
    Launch { path: PathBuf, reason: String },

    #[error("config error: {0}")]
    Config(String),
}

impl SortError {
    pub fn move_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SortError::MoveIo { path: path.into(), source }
    }

    /// True for the errors that abort entering a session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SortError::FolderInvalid { .. } | SortError::NotFound(_))
    }
}
