use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use docflow::clock::{Clock, ManualClock};
use docflow::config::WorkerConfig;
use docflow::engine::Claimer;
use docflow::error::{Error, Result};
use docflow::model::{
    AnalysisStatus, Commit, Completion, Document, DocumentId, DocumentPatch, Event, FieldMapping,
    Guard, NewDocument, Transition, transition,
};
use docflow::service::{AnalysisService, RequestOutcome};
use docflow::store::{DocumentStore, MemoryStore};
use serde_json::json;

struct Fixture {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    service: AnalysisService,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let service = AnalysisService::new(store.clone(), clock.clone());
        Self {
            store,
            clock,
            service,
        }
    }

    async fn upload(&self) -> Document {
        self.service
            .create_document(
                NewDocument::new("contract.txt", "2024/contract.txt")
                    .meta("title", "Supply contract")
                    .meta("owner", "legal"),
            )
            .await
            .unwrap()
    }

    /// Stand in for a worker: claim the document and finish with `completion`.
    async fn analyze(&self, completion: Completion) -> Document {
        let claimer = Claimer::new(
            self.store.clone(),
            self.clock.clone(),
            WorkerConfig::default(),
        );
        let claimed = claimer.claim_next("test-worker").await.unwrap().unwrap();
        claimer.complete(&claimed, completion).await.unwrap()
    }
}

fn analysis_result() -> serde_json::Value {
    json!({
        "entities": [{"surface": "Acme", "concept": "organization"}],
        "relations": [],
        "situations": [{"kind": "agreement"}]
    })
}

#[tokio::test]
async fn upload_analyze_review_commit() {
    let fx = Fixture::new();
    let doc = fx.upload().await;
    assert_eq!(
        fx.service.analysis(doc.id).await.unwrap().status,
        AnalysisStatus::None
    );

    let outcome = fx.service.request_analysis(doc.id).await.unwrap();
    assert!(matches!(outcome, RequestOutcome::Queued(_)));
    assert_eq!(outcome.document().analysis.status, AnalysisStatus::Pending);

    fx.analyze(Completion::Succeeded(analysis_result())).await;

    let view = fx.service.analysis(doc.id).await.unwrap();
    assert_eq!(view.status, AnalysisStatus::ReadyForReview);
    assert_eq!(view.result, Some(analysis_result()));
    assert_eq!(view.attempts, 1);
    assert!(view.error.is_none());

    let mapping = FieldMapping::new().keep("entities").nest("analysis");
    let committed = fx
        .service
        .commit(doc.id, Commit::new(mapping))
        .await
        .unwrap();

    assert_eq!(committed.analysis.status, AnalysisStatus::Committed);
    assert!(committed.analysis.result.is_none());
    assert_eq!(committed.metadata["title"], "Supply contract");
    assert_eq!(committed.metadata["owner"], "legal");
    assert_eq!(committed.metadata["entities"], analysis_result()["entities"]);
    assert_eq!(committed.metadata["analysis"], analysis_result());
}

#[tokio::test]
async fn request_on_pending_document_is_a_no_op() {
    let fx = Fixture::new();
    let doc = fx.upload().await;

    let first = fx.service.request_analysis(doc.id).await.unwrap();
    let queued_at = first.document().analysis.queued_at;
    fx.clock.advance(Duration::seconds(5));

    let second = fx.service.request_analysis(doc.id).await.unwrap();
    assert!(matches!(second, RequestOutcome::AlreadyQueued(_)));
    assert_eq!(second.document().analysis.queued_at, queued_at);
    assert_eq!(fx.store.oldest_pending(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn request_on_in_progress_document_is_a_no_op() {
    let fx = Fixture::new();
    let doc = fx.upload().await;
    fx.service.request_analysis(doc.id).await.unwrap();
    let claimer = Claimer::new(fx.store.clone(), fx.clock.clone(), WorkerConfig::default());
    claimer.claim_next("w").await.unwrap().unwrap();

    let outcome = fx.service.request_analysis(doc.id).await.unwrap();
    assert!(matches!(outcome, RequestOutcome::AlreadyQueued(_)));
    assert_eq!(
        fx.store.get(doc.id).await.unwrap().analysis.status,
        AnalysisStatus::InProgress
    );
}

#[tokio::test]
async fn discard_returns_to_none() {
    let fx = Fixture::new();
    let doc = fx.upload().await;
    fx.service.request_analysis(doc.id).await.unwrap();
    fx.analyze(Completion::Succeeded(analysis_result())).await;

    let discarded = fx.service.discard(doc.id).await.unwrap();
    assert_eq!(discarded.analysis.status, AnalysisStatus::None);
    assert!(discarded.analysis.result.is_none());
    assert_eq!(discarded.metadata, doc.metadata);
}

#[tokio::test]
async fn commit_with_reviewer_edits() {
    let fx = Fixture::new();
    let doc = fx.upload().await;
    fx.service.request_analysis(doc.id).await.unwrap();
    fx.analyze(Completion::Succeeded(analysis_result())).await;

    let edited = json!({"entities": [{"surface": "Acme Inc.", "concept": "organization"}]});
    let committed = fx
        .service
        .commit(
            doc.id,
            Commit::new(FieldMapping::new().keep("entities")).edited(edited.clone()),
        )
        .await
        .unwrap();
    assert_eq!(committed.metadata["entities"], edited["entities"]);
}

#[tokio::test]
async fn commit_outside_review_is_rejected() {
    let fx = Fixture::new();
    let doc = fx.upload().await;

    let err = fx
        .service
        .commit(doc.id, Commit::new(FieldMapping::new().nest("analysis")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: AnalysisStatus::None,
            ..
        }
    ));

    let err = fx.service.discard(doc.id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn failed_analysis_can_be_requested_again() {
    let fx = Fixture::new();
    let doc = fx.upload().await;
    fx.service.request_analysis(doc.id).await.unwrap();
    fx.analyze(Completion::Failed("unsupported format".into())).await;

    let view = fx.service.analysis(doc.id).await.unwrap();
    assert_eq!(view.status, AnalysisStatus::Failed);
    assert_eq!(view.error.as_deref(), Some("unsupported format"));

    let outcome = fx.service.request_analysis(doc.id).await.unwrap();
    let requeued = outcome.document();
    assert_eq!(requeued.analysis.status, AnalysisStatus::Pending);
    assert!(requeued.analysis.error.is_none());
    assert_eq!(requeued.analysis.attempt_count, 1);
}

#[tokio::test]
async fn committed_document_starts_a_new_cycle() {
    let fx = Fixture::new();
    let doc = fx.upload().await;
    fx.service.request_analysis(doc.id).await.unwrap();
    fx.analyze(Completion::Succeeded(analysis_result())).await;
    fx.service
        .commit(doc.id, Commit::new(FieldMapping::new().keep("entities")))
        .await
        .unwrap();

    let outcome = fx.service.request_analysis(doc.id).await.unwrap();
    assert!(matches!(outcome, RequestOutcome::Queued(_)));
    assert!(outcome.document().metadata.get("entities").is_some());
}

#[tokio::test]
async fn commit_read_before_a_rerun_does_not_merge_the_old_result() {
    let fx = Fixture::new();
    let doc = fx.upload().await;
    fx.service.request_analysis(doc.id).await.unwrap();
    fx.analyze(Completion::Succeeded(json!({"entities": ["old"]})))
        .await;
    let reviewed = fx.store.get(doc.id).await.unwrap();

    // Re-run completes before the reviewer's write lands.
    fx.service.request_analysis(doc.id).await.unwrap();
    fx.analyze(Completion::Succeeded(json!({"entities": ["new"]})))
        .await;

    let commit = Commit::new(FieldMapping::new().keep("entities"));
    let Transition::Apply { patch, guard, .. } =
        transition(&reviewed, Event::Commit(commit.clone()), fx.clock.now()).unwrap()
    else {
        panic!("expected an update");
    };
    let err = fx
        .store
        .update_fields(doc.id, &patch, Some(&guard))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let committed = fx.service.commit(doc.id, commit).await.unwrap();
    assert_eq!(committed.metadata["entities"], json!(["new"]));
}

#[tokio::test]
async fn unknown_document_is_not_found() {
    let fx = Fixture::new();
    let id = DocumentId::new();
    assert!(matches!(
        fx.service.request_analysis(id).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(fx.service.analysis(id).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn deleted_document_is_gone() {
    let fx = Fixture::new();
    let doc = fx.upload().await;
    fx.service.delete_document(doc.id).await.unwrap();
    assert!(matches!(
        fx.service.get_document(doc.id).await,
        Err(Error::NotFound(_))
    ));
    assert!(fx.service.list_documents(10).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Conflict retry
// ---------------------------------------------------------------------------

/// Loses the first `n` conditional writes, as if another actor got there first.
struct RacyStore {
    inner: MemoryStore,
    losses: AtomicU32,
}

#[async_trait]
impl DocumentStore for RacyStore {
    async fn get(&self, id: DocumentId) -> Result<Document> {
        self.inner.get(id).await
    }

    async fn create(&self, new: NewDocument) -> Result<Document> {
        self.inner.create(new).await
    }

    async fn update_fields(
        &self,
        id: DocumentId,
        patch: &DocumentPatch,
        guard: Option<&Guard>,
    ) -> Result<Document> {
        let lose = self
            .losses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lose {
            return Err(Error::Conflict(id.to_string()));
        }
        self.inner.update_fields(id, patch, guard).await
    }

    async fn delete(&self, id: DocumentId) -> Result<()> {
        self.inner.delete(id).await
    }

    async fn oldest_pending(&self, limit: usize) -> Result<Vec<Document>> {
        self.inner.oldest_pending(limit).await
    }

    async fn expired_claims(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Document>> {
        self.inner.expired_claims(now, limit).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<Document>> {
        self.inner.list(limit).await
    }
}

#[tokio::test]
async fn service_retries_after_conflict() {
    let store = Arc::new(RacyStore {
        inner: MemoryStore::new(),
        losses: AtomicU32::new(2),
    });
    let service = AnalysisService::new(store.clone(), Arc::new(ManualClock::default()));
    let doc = service
        .create_document(NewDocument::new("a.txt", "a.txt"))
        .await
        .unwrap();

    let outcome = service.request_analysis(doc.id).await.unwrap();
    assert!(matches!(outcome, RequestOutcome::Queued(_)));
    assert_eq!(store.losses.load(Ordering::SeqCst), 0);
}
