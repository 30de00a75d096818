//! Session store errors
//!
//! Validation failures are rejected synchronously and matched on by the
//! control layer; pipeline errors stay `anyhow` and land on chunks.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("chunk not found: {0}")]
    ChunkNotFound(String),

    #[error("a recording session is already active")]
    AlreadyRecording,

    #[error("no recording session is active")]
    NotRecording,

    #[error("cannot delete the active recording session")]
    SessionActive,

    #[error("{0}")]
    Validation(String),

    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl StoreError {
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}
