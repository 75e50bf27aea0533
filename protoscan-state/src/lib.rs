//! Crash-safe scan-state persistence.
//!
//! One pretty-printed JSON file per live scan plus an index of incomplete
//! scans; every write goes through a temp-file-then-rename so a partial file
//! is never observable at the final path.

mod store;

pub use store::{ResumeManager, ScanState, DEFAULT_STATE_DIR, INDEX_FILE};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("scan state not found: {0}")]
    NotFound(String),
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
