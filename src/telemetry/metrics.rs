//! Metric instrument factories for docflow.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a provider (tests, no OTLP endpoint) every instrument is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("docflow")
}

/// Counter: analysis requests from the API side.
/// Labels: `result` ("queued" | "already_queued").
pub fn analysis_requested() -> Counter<u64> {
    meter()
        .u64_counter("docflow.analysis.requested")
        .with_description("Number of analysis requests")
        .build()
}

/// Counter: analysis state transitions.
/// Labels: `from`, `to`.
pub fn analysis_transitions() -> Counter<u64> {
    meter()
        .u64_counter("docflow.analysis.state_transitions")
        .with_description("Number of analysis state transitions")
        .build()
}

/// Counter: conditional updates that lost a race.
/// Labels: `operation`.
pub fn update_conflicts() -> Counter<u64> {
    meter()
        .u64_counter("docflow.store.conflicts")
        .with_description("Conditional updates rejected because the document changed")
        .build()
}

/// Counter: orphaned claims recovered by reconciliation.
/// Labels: `requeued` ("true" | "false").
pub fn claims_expired() -> Counter<u64> {
    meter()
        .u64_counter("docflow.claims.expired")
        .with_description("Claims recovered after their deadline elapsed")
        .build()
}

/// Counter: analysis attempt outcomes.
/// Labels: `outcome` ("succeeded" | "failed" | "retry" | "abandoned" | "lost").
pub fn analysis_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("docflow.analysis.outcomes")
        .with_description("Outcomes of analysis attempts")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("docflow.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
