//! Analysis attempt span helpers.

use tracing::Span;

use crate::model::{AnalysisStatus, DocumentId};

/// Start a span covering one claimed analysis attempt.
pub fn start_attempt_span(document_id: DocumentId, owner: &str, attempt: u32) -> Span {
    tracing::info_span!(
        "analysis.attempt",
        "document.id" = %document_id.0,
        "analysis.owner" = owner,
        "analysis.attempt" = attempt,
    )
}

/// Emit a state transition event scoped to the given span.
pub fn record_state_transition(span: &Span, from: AnalysisStatus, to: AnalysisStatus) {
    span.in_scope(|| {
        tracing::info!(from = %from, to = %to, "state_transition");
    });
}
