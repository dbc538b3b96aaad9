//! Error types for docflow.

use thiserror::Error;

use crate::model::{AnalysisStatus, EventKind};

#[derive(Debug, Error)]
pub enum Error {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("invalid transition: cannot {event} a document in state {from}")]
    InvalidTransition {
        from: AnalysisStatus,
        event: EventKind,
    },

    /// A conditional update lost a race. Callers retry; never shown to end users.
    #[error("conflict: document {0} changed concurrently")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
