//! Operations exposed to the API layer.
//!
//! Each analysis operation reads the document, evaluates the state machine,
//! and writes the result conditionally. A `Conflict` means another actor moved
//! the document between the read and the write; the operation re-reads and
//! re-evaluates, so callers only ever see the final answer:
//! a new document, `NotFound`, or `InvalidTransition`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::engine::claimer::record_transition;
use crate::error::{Error, Result};
use crate::model::{
    AnalysisStatus, Commit, Document, DocumentId, Event, NewDocument, Transition, transition,
};
use crate::store::DocumentStore;
use crate::telemetry::metrics;

/// Result of `request_analysis`.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// Document moved to `pending`.
    Queued(Document),
    /// Already `pending` or `in_progress`; nothing changed.
    AlreadyQueued(Document),
}

impl RequestOutcome {
    pub fn document(&self) -> &Document {
        match self {
            RequestOutcome::Queued(doc) | RequestOutcome::AlreadyQueued(doc) => doc,
        }
    }
}

/// What a reviewer sees when fetching an analysis.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisView {
    pub document_id: DocumentId,
    pub status: AnalysisStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub last_updated: DateTime<Utc>,
}

impl From<&Document> for AnalysisView {
    fn from(doc: &Document) -> Self {
        Self {
            document_id: doc.id,
            status: doc.analysis.status,
            result: doc.analysis.result.clone(),
            error: doc.analysis.error.clone(),
            attempts: doc.analysis.attempt_count,
            last_updated: doc.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct AnalysisService {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
}

enum Applied {
    Changed(Document),
    AlreadyQueued(Document),
}

impl AnalysisService {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn create_document(&self, new: NewDocument) -> Result<Document> {
        let doc = self.store.create(new).await?;
        info!(document_id = %doc.id, filename = %doc.filename, "document created");
        Ok(doc)
    }

    pub async fn get_document(&self, id: DocumentId) -> Result<Document> {
        self.store.get(id).await
    }

    pub async fn list_documents(&self, limit: usize) -> Result<Vec<Document>> {
        self.store.list(limit).await
    }

    /// Delete a document. A worker mid-analysis finds it gone on completion.
    pub async fn delete_document(&self, id: DocumentId) -> Result<()> {
        self.store.delete(id).await?;
        info!(document_id = %id, "document deleted");
        Ok(())
    }

    /// Queue a document for analysis.
    pub async fn request_analysis(&self, id: DocumentId) -> Result<RequestOutcome> {
        let outcome = match self.apply(id, || Event::RequestAnalysis).await? {
            Applied::Changed(doc) => RequestOutcome::Queued(doc),
            Applied::AlreadyQueued(doc) => {
                debug!(document_id = %id, status = %doc.analysis.status, "analysis already queued");
                RequestOutcome::AlreadyQueued(doc)
            }
        };
        let result = match outcome {
            RequestOutcome::Queued(_) => "queued",
            RequestOutcome::AlreadyQueued(_) => "already_queued",
        };
        metrics::analysis_requested().add(1, &[KeyValue::new("result", result)]);
        Ok(outcome)
    }

    /// The fetch-for-review read.
    pub async fn analysis(&self, id: DocumentId) -> Result<AnalysisView> {
        let doc = self.store.get(id).await?;
        Ok(AnalysisView::from(&doc))
    }

    /// Merge the reviewed analysis into the document's metadata.
    pub async fn commit(&self, id: DocumentId, commit: Commit) -> Result<Document> {
        let doc = self.changed(id, || Event::Commit(commit.clone())).await?;
        info!(document_id = %id, "analysis committed");
        Ok(doc)
    }

    /// Throw the reviewed analysis away and return the document to `none`.
    pub async fn discard(&self, id: DocumentId) -> Result<Document> {
        let doc = self.changed(id, || Event::Discard).await?;
        info!(document_id = %id, "analysis discarded");
        Ok(doc)
    }

    async fn changed(&self, id: DocumentId, event: impl Fn() -> Event) -> Result<Document> {
        match self.apply(id, event).await? {
            Applied::Changed(doc) | Applied::AlreadyQueued(doc) => Ok(doc),
        }
    }

    /// Read, decide, write; on `Conflict` start over from a fresh read.
    async fn apply(&self, id: DocumentId, event: impl Fn() -> Event) -> Result<Applied> {
        loop {
            let doc = self.store.get(id).await?;
            match transition(&doc, event(), self.clock.now())? {
                Transition::AlreadyQueued => return Ok(Applied::AlreadyQueued(doc)),
                Transition::Apply {
                    from,
                    to,
                    patch,
                    guard,
                } => match self.store.update_fields(id, &patch, Some(&guard)).await {
                    Ok(updated) => {
                        record_transition(id, from, to);
                        return Ok(Applied::Changed(updated));
                    }
                    Err(Error::Conflict(_)) => {
                        debug!(document_id = %id, %from, %to, "conflict, retrying");
                        metrics::update_conflicts().add(1, &[KeyValue::new("operation", "api")]);
                    }
                    Err(e) => return Err(e),
                },
            }
        }
    }
}
