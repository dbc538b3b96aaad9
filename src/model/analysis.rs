//! Analysis state machine.
//!
//! Pure logic: given a document, an event and the current time, produce the
//! patch that moves the document to its next state, or reject the event. The
//! store applies the patch as a conditional update guarded on the state the
//! decision was made from, so a stale decision can never land.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::{Document, DocumentPatch, Guard};
use super::mapping::FieldMapping;
use crate::error::{Error, Result};

/// Error recorded when reconciliation recovers an orphaned claim.
pub const CLAIM_EXPIRED: &str = "claim expired";

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a document's analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// No analysis requested (or the last one was discarded).
    None,
    /// Waiting for a worker.
    Pending,
    /// Claimed by a worker.
    InProgress,
    /// Analysis produced, awaiting a human decision.
    ReadyForReview,
    /// Analysis merged into the document's metadata.
    Committed,
    /// Analysis failed terminally for this cycle.
    Failed,
}

impl AnalysisStatus {
    pub const ALL: [AnalysisStatus; 6] = [
        AnalysisStatus::None,
        AnalysisStatus::Pending,
        AnalysisStatus::InProgress,
        AnalysisStatus::ReadyForReview,
        AnalysisStatus::Committed,
        AnalysisStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::None => "none",
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::InProgress => "in_progress",
            AnalysisStatus::ReadyForReview => "ready_for_review",
            AnalysisStatus::Committed => "committed",
            AnalysisStatus::Failed => "failed",
        }
    }

    /// Can the document move from self to `to` along some event?
    pub fn can_transition_to(self, to: AnalysisStatus) -> bool {
        use AnalysisStatus::*;
        matches!(
            (self, to),
            (None, Pending)
                | (ReadyForReview, Pending)   // re-run
                | (Failed, Pending)           // manual or automatic retry
                | (Committed, Pending)        // new cycle
                | (Pending, InProgress)
                | (InProgress, ReadyForReview)
                | (InProgress, Failed)
                | (InProgress, Pending)       // transient failure, retry
                | (ReadyForReview, Committed)
                | (ReadyForReview, None) // discard
        )
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AnalysisStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AnalysisStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Other(format!("unknown analysis status: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// How a claimed analysis ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Succeeded(serde_json::Value),
    Failed(String),
    /// Transient failure with attempts left: back to `pending`.
    Retry(String),
}

/// What a reviewer commits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Commit {
    pub mapping: FieldMapping,
    /// Reviewer's revised analysis, replacing the produced one.
    pub edited: Option<serde_json::Value>,
}

impl Commit {
    pub fn new(mapping: FieldMapping) -> Self {
        Self {
            mapping,
            edited: None,
        }
    }

    pub fn edited(mut self, result: serde_json::Value) -> Self {
        self.edited = Some(result);
        self
    }
}

/// Something that happens to a document's analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    RequestAnalysis,
    Claim {
        owner: String,
        deadline: DateTime<Utc>,
    },
    Complete(Completion),
    Commit(Commit),
    Discard,
    /// Reconciliation found the claim past its deadline.
    Expire,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::RequestAnalysis => EventKind::RequestAnalysis,
            Event::Claim { .. } => EventKind::Claim,
            Event::Complete(_) => EventKind::Complete,
            Event::Commit(_) => EventKind::Commit,
            Event::Discard => EventKind::Discard,
            Event::Expire => EventKind::Expire,
        }
    }
}

/// Payload-free event name, for errors and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RequestAnalysis,
    Claim,
    Complete,
    Commit,
    Discard,
    Expire,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::RequestAnalysis => "request_analysis",
            EventKind::Claim => "claim",
            EventKind::Complete => "complete",
            EventKind::Commit => "commit",
            EventKind::Discard => "discard",
            EventKind::Expire => "expire",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Outcome of evaluating an event against a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Write `patch`, guarded by `guard`, moving `from -> to`.
    Apply {
        from: AnalysisStatus,
        to: AnalysisStatus,
        patch: DocumentPatch,
        guard: Guard,
    },
    /// `request_analysis` on a document already queued or running.
    AlreadyQueued,
}

/// Evaluate `event` against the document's current analysis state.
pub fn transition(doc: &Document, event: Event, now: DateTime<Utc>) -> Result<Transition> {
    use AnalysisStatus::*;

    let from = doc.analysis.status;
    let kind = event.kind();
    let reject = || Error::InvalidTransition { from, event: kind };

    let (to, patch, guard) = match (from, event) {
        (Pending | InProgress, Event::RequestAnalysis) => return Ok(Transition::AlreadyQueued),

        (None | ReadyForReview | Failed | Committed, Event::RequestAnalysis) => (
            Pending,
            DocumentPatch {
                status: Some(Pending),
                result: Some(Option::None),
                error: Some(Option::None),
                queued_at: Some(Some(now)),
                ..Default::default()
            },
            Guard::status(from),
        ),

        (Pending, Event::Claim { owner, deadline }) => (
            InProgress,
            DocumentPatch {
                status: Some(InProgress),
                increment_attempts: true,
                queued_at: Some(Option::None),
                claimed_at: Some(Some(now)),
                claim_deadline: Some(Some(deadline)),
                claim_owner: Some(Some(owner)),
                ..Default::default()
            },
            Guard::status(Pending),
        ),

        (InProgress, Event::Complete(completion)) => {
            let guard = match doc.analysis.claim_owner {
                Some(ref owner) => Guard::status(InProgress).owned_by(owner.clone()),
                Option::None => Guard::status(InProgress),
            };
            let (to, patch) = match completion {
                Completion::Succeeded(result) => (
                    ReadyForReview,
                    DocumentPatch {
                        status: Some(ReadyForReview),
                        result: Some(Some(result)),
                        error: Some(Option::None),
                        ..Default::default()
                    },
                ),
                Completion::Failed(error) => (
                    Failed,
                    DocumentPatch {
                        status: Some(Failed),
                        result: Some(Option::None),
                        error: Some(Some(error)),
                        ..Default::default()
                    },
                ),
                Completion::Retry(_) => (
                    Pending,
                    DocumentPatch {
                        status: Some(Pending),
                        result: Some(Option::None),
                        error: Some(Option::None),
                        queued_at: Some(Some(now)),
                        ..Default::default()
                    },
                ),
            };
            (to, patch.release_claim(), guard)
        }

        (InProgress, Event::Expire) => {
            let guard = match doc.analysis.claim_owner {
                Some(ref owner) => Guard::status(InProgress).owned_by(owner.clone()),
                Option::None => Guard::status(InProgress),
            };
            let patch = DocumentPatch {
                status: Some(Failed),
                result: Some(Option::None),
                error: Some(Some(CLAIM_EXPIRED.to_string())),
                ..Default::default()
            };
            (Failed, patch.release_claim(), guard)
        }

        (ReadyForReview, Event::Commit(commit)) => {
            let result = match commit.edited {
                Some(edited) => edited,
                Option::None => doc.analysis.result.clone().ok_or_else(|| {
                    Error::Other(format!("document {} is ready for review without a result", doc.id))
                })?,
            };
            let metadata = commit.mapping.merge(&doc.metadata, &result)?;
            (
                Committed,
                DocumentPatch {
                    status: Some(Committed),
                    result: Some(Option::None),
                    error: Some(Option::None),
                    metadata: Some(metadata),
                    ..Default::default()
                },
                Guard::status(ReadyForReview),
            )
        }

        (ReadyForReview, Event::Discard) => (
            None,
            DocumentPatch {
                status: Some(None),
                result: Some(Option::None),
                error: Some(Option::None),
                ..Default::default()
            },
            Guard::status(ReadyForReview),
        ),

        _ => return Err(reject()),
    };

    debug_assert!(from.can_transition_to(to), "{from} -> {to} missing from edge table");

    // Every decision is tied to the claim cycle it was read in.
    let guard = guard.at_attempt(doc.analysis.attempt_count);

    Ok(Transition::Apply {
        from,
        to,
        patch,
        guard,
    })
}
