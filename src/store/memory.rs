//! In-process document store.
//!
//! Backs tests and single-process runs. The guard check and the write happen
//! under one lock acquisition, which gives the same compare-and-set semantics
//! as the Postgres `UPDATE ... WHERE analysis_status = $n`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::DocumentStore;
use crate::error::{Error, Result};
use crate::model::{AnalysisStatus, Document, DocumentId, DocumentPatch, Guard, NewDocument};

#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<DocumentId, Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<DocumentId, Document>>> {
        self.docs
            .lock()
            .map_err(|_| Error::Other("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: DocumentId) -> Result<Document> {
        self.lock()?
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("document {id}")))
    }

    async fn create(&self, new: NewDocument) -> Result<Document> {
        let doc = new.into_document(Utc::now());
        self.lock()?.insert(doc.id, doc.clone());
        Ok(doc)
    }

    async fn update_fields(
        &self,
        id: DocumentId,
        patch: &DocumentPatch,
        guard: Option<&Guard>,
    ) -> Result<Document> {
        let mut docs = self.lock()?;
        let doc = docs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("document {id}")))?;

        if let Some(guard) = guard {
            if !guard.matches(&doc.analysis) {
                return Err(Error::Conflict(id.to_string()));
            }
        }

        patch.apply_to(doc, Utc::now());
        Ok(doc.clone())
    }

    async fn delete(&self, id: DocumentId) -> Result<()> {
        self.lock()?
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("document {id}")))
    }

    async fn oldest_pending(&self, limit: usize) -> Result<Vec<Document>> {
        let mut pending: Vec<Document> = self
            .lock()?
            .values()
            .filter(|d| d.analysis.status == AnalysisStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.analysis
                .queued_at
                .cmp(&b.analysis.queued_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    async fn expired_claims(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Document>> {
        let mut expired: Vec<Document> = self
            .lock()?
            .values()
            .filter(|d| {
                d.analysis.status == AnalysisStatus::InProgress
                    && d.analysis.claim_deadline.is_some_and(|deadline| deadline <= now)
            })
            .cloned()
            .collect();
        expired.sort_by_key(|d| d.analysis.claim_deadline);
        expired.truncate(limit);
        Ok(expired)
    }

    async fn list(&self, limit: usize) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self.lock()?.values().cloned().collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        docs.truncate(limit);
        Ok(docs)
    }
}
