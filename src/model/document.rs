//! Document record and the partial-update types the store accepts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::analysis::AnalysisStatus;

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// An uploaded document and its analysis sub-state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,

    /// Original filename as uploaded.
    pub filename: String,

    /// Where the file storage collaborator keeps the bytes. Opaque here.
    pub content_ref: String,

    /// Authoritative metadata. Always a JSON object.
    pub metadata: serde_json::Value,

    pub analysis: AnalysisRecord,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Newtype for document IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for DocumentId {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        Uuid::parse_str(s)
            .map(DocumentId)
            .map_err(|e| crate::error::Error::Other(format!("bad document id {s:?}: {e}")))
    }
}

/// Analysis lifecycle fields stored alongside the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub status: AnalysisStatus,

    /// Produced analysis awaiting review. Set only in `ready_for_review`.
    pub result: Option<serde_json::Value>,

    /// Terminal diagnostic. Set only in `failed`.
    pub error: Option<String>,

    /// Number of claims so far. Never decreases.
    pub attempt_count: u32,

    /// When the document last entered `pending`. FIFO key for the claimer.
    pub queued_at: Option<DateTime<Utc>>,

    pub claimed_at: Option<DateTime<Utc>>,
    pub claim_deadline: Option<DateTime<Utc>>,
    pub claim_owner: Option<String>,
}

impl Default for AnalysisRecord {
    fn default() -> Self {
        Self {
            status: AnalysisStatus::None,
            result: None,
            error: None,
            attempt_count: 0,
            queued_at: None,
            claimed_at: None,
            claim_deadline: None,
            claim_owner: None,
        }
    }
}

// ---------------------------------------------------------------------------
// New document
// ---------------------------------------------------------------------------

/// Builder for registering a document with the store.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub(crate) filename: String,
    pub(crate) content_ref: String,
    pub(crate) metadata: serde_json::Map<String, serde_json::Value>,
}

impl NewDocument {
    pub fn new(filename: impl Into<String>, content_ref: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content_ref: content_ref.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Build the initial record. Analysis always starts at `none`.
    pub fn into_document(self, now: DateTime<Utc>) -> Document {
        Document {
            id: DocumentId::new(),
            filename: self.filename,
            content_ref: self.content_ref,
            metadata: serde_json::Value::Object(self.metadata),
            analysis: AnalysisRecord::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Patch + guard
// ---------------------------------------------------------------------------

/// Partial update. `None` leaves a field alone; `Some(None)` clears a nullable one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentPatch {
    pub status: Option<AnalysisStatus>,
    pub result: Option<Option<serde_json::Value>>,
    pub error: Option<Option<String>>,
    /// Applied by the store as `attempt_count + 1`, never from a read value.
    pub increment_attempts: bool,
    pub queued_at: Option<Option<DateTime<Utc>>>,
    pub claimed_at: Option<Option<DateTime<Utc>>>,
    pub claim_deadline: Option<Option<DateTime<Utc>>>,
    pub claim_owner: Option<Option<String>>,
    pub metadata: Option<serde_json::Value>,
}

impl DocumentPatch {
    /// Apply to an in-memory record. Stores without SQL use this directly.
    pub fn apply_to(&self, doc: &mut Document, now: DateTime<Utc>) {
        let a = &mut doc.analysis;
        if let Some(status) = self.status {
            a.status = status;
        }
        if let Some(ref result) = self.result {
            a.result = result.clone();
        }
        if let Some(ref error) = self.error {
            a.error = error.clone();
        }
        if self.increment_attempts {
            a.attempt_count += 1;
        }
        if let Some(queued_at) = self.queued_at {
            a.queued_at = queued_at;
        }
        if let Some(claimed_at) = self.claimed_at {
            a.claimed_at = claimed_at;
        }
        if let Some(deadline) = self.claim_deadline {
            a.claim_deadline = deadline;
        }
        if let Some(ref owner) = self.claim_owner {
            a.claim_owner = owner.clone();
        }
        if let Some(ref metadata) = self.metadata {
            doc.metadata = metadata.clone();
        }
        doc.updated_at = now;
    }

    /// Clear all claim bookkeeping.
    pub(crate) fn release_claim(mut self) -> Self {
        self.claimed_at = Some(None);
        self.claim_deadline = Some(None);
        self.claim_owner = Some(None);
        self
    }
}

/// Precondition for a conditional update.
///
/// `attempt_count` pins the guard to one claim cycle. Status and owner repeat
/// across cycles; the attempt count never does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    pub status: AnalysisStatus,
    pub claim_owner: Option<String>,
    pub attempt_count: Option<u32>,
}

impl Guard {
    pub fn status(status: AnalysisStatus) -> Self {
        Self {
            status,
            claim_owner: None,
            attempt_count: None,
        }
    }

    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.claim_owner = Some(owner.into());
        self
    }

    pub fn at_attempt(mut self, attempt_count: u32) -> Self {
        self.attempt_count = Some(attempt_count);
        self
    }

    /// Does the stored record still satisfy this guard?
    pub fn matches(&self, record: &AnalysisRecord) -> bool {
        if record.status != self.status {
            return false;
        }
        if let Some(attempt_count) = self.attempt_count {
            if record.attempt_count != attempt_count {
                return false;
            }
        }
        match self.claim_owner {
            Some(ref owner) => record.claim_owner.as_deref() == Some(owner.as_str()),
            None => true,
        }
    }
}
