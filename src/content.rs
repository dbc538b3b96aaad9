//! Document content, resolved through the file storage collaborator.
//!
//! The pipeline never manages paths or storage media itself; it only asks a
//! [`ContentSource`] for the bytes behind a document's `content_ref`.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::model::Document;

/// Bytes of a document, with the name it was uploaded under.
#[derive(Debug, Clone)]
pub struct Content {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ContentError {
    /// The reference resolves to nothing. Retrying won't help.
    #[error("content missing: {0}")]
    Missing(String),

    #[error("invalid content reference: {0}")]
    InvalidReference(String),

    /// Storage hiccup; worth another attempt.
    #[error("content unreadable: {0}")]
    Unreadable(String),
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn load(&self, doc: &Document) -> std::result::Result<Content, ContentError>;
}

/// Files under a local upload directory, addressed by relative `content_ref`.
#[derive(Debug, Clone)]
pub struct FsContentSource {
    root: PathBuf,
}

impl FsContentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a reference under the root, refusing anything that could escape it.
    pub fn resolve(&self, content_ref: &str) -> std::result::Result<PathBuf, ContentError> {
        let rel = Path::new(content_ref);
        if content_ref.is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(ContentError::InvalidReference(content_ref.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ContentSource for FsContentSource {
    async fn load(&self, doc: &Document) -> std::result::Result<Content, ContentError> {
        let path = self.resolve(&doc.content_ref)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Content {
                filename: doc.filename.clone(),
                bytes,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ContentError::Missing(path.display().to_string()))
            }
            Err(e) => Err(ContentError::Unreadable(format!("{}: {e}", path.display()))),
        }
    }
}
