//! Job claimer: race-safe selection of the next document to analyze, and
//! recovery of claims whose holder died.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::model::{
    AnalysisStatus, Completion, Document, DocumentId, Event, Transition, transition,
};
use crate::store::DocumentStore;
use crate::telemetry::metrics;

/// Selects, locks and releases documents on behalf of workers.
///
/// Holds no state of its own; all coordination goes through the store's
/// conditional write, so any number of claimers may run concurrently.
#[derive(Clone)]
pub struct Claimer {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
}

impl Claimer {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: WorkerConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Claim the oldest pending document for `owner`. `None` when nothing is pending.
    ///
    /// Losing a race on one candidate moves on to the next; losing a whole
    /// batch triggers a fresh scan.
    pub async fn claim_next(&self, owner: &str) -> Result<Option<Document>> {
        loop {
            let candidates = self.store.oldest_pending(self.config.claim_batch).await?;
            if candidates.is_empty() {
                return Ok(None);
            }

            for candidate in candidates {
                match self.try_claim(&candidate, owner).await {
                    Ok(doc) => return Ok(Some(doc)),
                    Err(Error::Conflict(_)) | Err(Error::NotFound(_)) => {
                        debug!(document_id = %candidate.id, owner, "lost claim race");
                        metrics::update_conflicts()
                            .add(1, &[KeyValue::new("operation", "claim")]);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    async fn try_claim(&self, candidate: &Document, owner: &str) -> Result<Document> {
        let now = self.clock.now();
        let event = Event::Claim {
            owner: owner.to_string(),
            deadline: now + self.config.claim_ttl_chrono(),
        };
        let doc = self.apply(candidate, event).await?;
        info!(
            document_id = %doc.id,
            owner,
            attempt = doc.analysis.attempt_count,
            "claimed document for analysis"
        );
        Ok(doc)
    }

    /// Record the outcome of a claimed analysis.
    ///
    /// Guarded on the claim owner: `Error::Conflict` means the claim expired and
    /// the document moved on without us.
    pub async fn complete(&self, claimed: &Document, completion: Completion) -> Result<Document> {
        self.apply(claimed, Event::Complete(completion)).await
    }

    /// Recover claims whose deadline has elapsed. Returns how many were recovered.
    ///
    /// Each is force-failed with "claim expired"; with `requeue_expired` and
    /// attempts remaining it goes straight back to `pending`.
    pub async fn reconcile(&self) -> Result<usize> {
        let now = self.clock.now();
        let expired = self
            .store
            .expired_claims(now, self.config.claim_batch)
            .await?;

        let mut recovered = 0;
        for doc in expired {
            let failed = match self.apply(&doc, Event::Expire).await {
                Ok(failed) => failed,
                Err(Error::Conflict(_)) | Err(Error::NotFound(_)) => {
                    // Completed or deleted since the scan.
                    metrics::update_conflicts().add(1, &[KeyValue::new("operation", "expire")]);
                    continue;
                }
                Err(e) => return Err(e),
            };
            recovered += 1;

            let requeue = self.config.requeue_expired
                && failed.analysis.attempt_count < self.config.max_attempts;

            warn!(
                document_id = %doc.id,
                owner = doc.analysis.claim_owner.as_deref().unwrap_or("unknown"),
                attempt = failed.analysis.attempt_count,
                requeue,
                "claim expired"
            );
            metrics::claims_expired().add(1, &[KeyValue::new("requeued", requeue.to_string())]);

            if requeue {
                match self.apply(&failed, Event::RequestAnalysis).await {
                    Ok(_) | Err(Error::Conflict(_)) | Err(Error::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(recovered)
    }

    /// Evaluate `event` against `doc` and write it conditionally.
    async fn apply(&self, doc: &Document, event: Event) -> Result<Document> {
        match transition(doc, event, self.clock.now())? {
            Transition::Apply {
                from,
                to,
                patch,
                guard,
            } => {
                let updated = self.store.update_fields(doc.id, &patch, Some(&guard)).await?;
                record_transition(doc.id, from, to);
                Ok(updated)
            }
            Transition::AlreadyQueued => Ok(doc.clone()),
        }
    }
}

pub(crate) fn record_transition(id: DocumentId, from: AnalysisStatus, to: AnalysisStatus) {
    debug!(document_id = %id, %from, %to, "analysis state transition");
    metrics::analysis_transitions().add(
        1,
        &[
            KeyValue::new("from", from.as_str()),
            KeyValue::new("to", to.as_str()),
        ],
    );
}
