//! Analysis worker loop: reconcile, claim, analyze, persist, repeat.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, warn};

use super::attempt::{AttemptResult, AttemptRunner};
use super::claimer::Claimer;
use crate::error::{Error, Result};
use crate::model::{AnalysisStatus, Completion, Document};
use crate::telemetry::analysis::{record_state_transition, start_attempt_span};
use crate::telemetry::metrics;

/// Broadcast stop signal shared by any number of workers.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal every subscribed worker to stop.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once shutdown is signalled (or the signal can no longer arrive).
async fn stopped(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing pending.
    Idle,
    /// Claimed and finished a document.
    Processed,
    /// Shutdown arrived mid-analysis; the claim was left to expire.
    Abandoned,
}

/// One logical worker. Run several (in one process or many) for throughput.
pub struct Worker {
    id: String,
    claimer: Claimer,
    runner: AttemptRunner,
    shutdown: Shutdown,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        claimer: Claimer,
        runner: AttemptRunner,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            id: id.into(),
            claimer,
            runner,
            shutdown,
        }
    }

    /// Run until shutdown. Individual document failures never end the loop.
    pub async fn run(&self) {
        let mut rx = self.shutdown.subscribe();
        let poll_interval = self.claimer.config().poll_interval;
        info!(worker = %self.id, "analysis worker started");

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            let tick = match self.tick().await {
                Ok(tick) => tick,
                Err(e) => {
                    error!(worker = %self.id, "worker iteration failed: {e}");
                    Tick::Idle
                }
            };

            match tick {
                Tick::Processed => continue,
                Tick::Abandoned => break,
                Tick::Idle => {}
            }

            tokio::select! {
                _ = stopped(&mut rx) => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        info!(worker = %self.id, "analysis worker stopped");
    }

    /// Reconcile orphans, then claim and process at most one document.
    pub async fn tick(&self) -> Result<Tick> {
        let recovered = self.claimer.reconcile().await?;
        if recovered > 0 {
            info!(worker = %self.id, recovered, "recovered expired claims");
        }

        let Some(doc) = self.claimer.claim_next(&self.id).await? else {
            return Ok(Tick::Idle);
        };

        let span = start_attempt_span(doc.id, &self.id, doc.analysis.attempt_count);
        record_state_transition(&span, AnalysisStatus::Pending, AnalysisStatus::InProgress);

        self.process(doc, &span).instrument(span.clone()).await
    }

    async fn process(&self, doc: Document, span: &tracing::Span) -> Result<Tick> {
        let mut rx = self.shutdown.subscribe();

        let result = tokio::select! {
            result = self.runner.run(&doc) => result,
            _ = stopped(&mut rx) => {
                warn!(
                    document_id = %doc.id,
                    "shutdown during analysis, abandoning claim until it expires"
                );
                metrics::analysis_outcomes().add(1, &[KeyValue::new("outcome", "abandoned")]);
                return Ok(Tick::Abandoned);
            }
        };

        let duration_ms = result.duration_ms();
        metrics::operation_duration_ms().record(
            duration_ms as f64,
            &[KeyValue::new("operation", "analysis.attempt")],
        );

        let max_attempts = self.claimer.config().max_attempts;
        let attempt = doc.analysis.attempt_count;
        if let AttemptResult::Failed { ref error, .. } = result {
            warn!(document_id = %doc.id, attempt, max_attempts, %error, duration_ms, "analysis attempt failed");
        }

        let completion = result.into_completion(attempt, max_attempts);
        let outcome = match completion {
            Completion::Succeeded(_) => "succeeded",
            Completion::Failed(_) => "failed",
            Completion::Retry(_) => "retry",
        };

        match self.claimer.complete(&doc, completion).await {
            Ok(updated) => {
                record_state_transition(span, AnalysisStatus::InProgress, updated.analysis.status);
                info!(
                    document_id = %doc.id,
                    status = %updated.analysis.status,
                    attempt,
                    duration_ms,
                    "analysis attempt recorded"
                );
                metrics::analysis_outcomes().add(1, &[KeyValue::new("outcome", outcome)]);
            }
            Err(Error::Conflict(_)) => {
                warn!(document_id = %doc.id, "claim lost before completion, dropping result");
                metrics::analysis_outcomes().add(1, &[KeyValue::new("outcome", "lost")]);
            }
            Err(Error::NotFound(_)) => {
                warn!(document_id = %doc.id, "document deleted during analysis, dropping result");
                metrics::analysis_outcomes().add(1, &[KeyValue::new("outcome", "lost")]);
            }
            Err(e) => return Err(e),
        }

        Ok(Tick::Processed)
    }
}

/// A set of worker loops sharing collaborators and one shutdown signal.
pub struct WorkerPool {
    shutdown: Shutdown,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` workers named `{prefix}:{index}`.
    pub fn spawn(size: usize, prefix: &str, claimer: Claimer, runner: AttemptRunner) -> Self {
        let shutdown = Shutdown::new();
        let handles = (0..size)
            .map(|index| {
                let worker = Worker::new(
                    format!("{prefix}:{index}"),
                    claimer.clone(),
                    runner.clone(),
                    shutdown.clone(),
                );
                tokio::spawn(async move { worker.run().await })
            })
            .collect();
        Self { shutdown, handles }
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Signal all workers to stop.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("worker task panicked: {e}");
            }
        }
    }
}

/// Default worker name prefix: `{hostname}:{pid}`.
pub fn worker_prefix() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{host}:{}", std::process::id())
}
