//! Document store contract.
//!
//! The store is the single source of truth and the only shared mutable
//! resource in the pipeline. Every analysis-state write goes through
//! [`DocumentStore::update_fields`] with a [`Guard`], which makes the store's
//! conditional write the one point of mutual exclusion between API callers and
//! any number of workers.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Document, DocumentId, DocumentPatch, Guard, NewDocument};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document. `Error::NotFound` if absent.
    async fn get(&self, id: DocumentId) -> Result<Document>;

    /// Insert a new document with analysis status `none`.
    async fn create(&self, new: NewDocument) -> Result<Document>;

    /// Conditional partial update.
    ///
    /// With a guard, the patch lands only if the stored record still matches
    /// it; otherwise `Error::Conflict`. Returns the updated document.
    async fn update_fields(
        &self,
        id: DocumentId,
        patch: &DocumentPatch,
        guard: Option<&Guard>,
    ) -> Result<Document>;

    /// Remove a document. `Error::NotFound` if absent.
    async fn delete(&self, id: DocumentId) -> Result<()>;

    /// Oldest `pending` documents by `queued_at`, ties broken by id.
    async fn oldest_pending(&self, limit: usize) -> Result<Vec<Document>>;

    /// `in_progress` documents whose claim deadline is at or before `now`.
    async fn expired_claims(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Document>>;

    /// Most recently created documents first.
    async fn list(&self, limit: usize) -> Result<Vec<Document>>;
}
