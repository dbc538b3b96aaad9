//! Core data model.
//!
//! A document carries its own analysis sub-state. There is no separate queue:
//! documents in `pending` *are* the queue, ordered by when they entered it.

pub mod analysis;
pub mod document;
pub mod mapping;

pub use analysis::{
    AnalysisStatus, CLAIM_EXPIRED, Commit, Completion, Event, EventKind, Transition, transition,
};
pub use document::{AnalysisRecord, Document, DocumentId, DocumentPatch, Guard, NewDocument};
pub use mapping::FieldMapping;
