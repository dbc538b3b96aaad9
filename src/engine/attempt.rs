//! A single analysis attempt: load the content, call the analyzer under a
//! deadline, and turn the result into a [`Completion`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::analyzer::{AnalysisError, Analyzer};
use crate::content::{ContentError, ContentSource};
use crate::model::{Completion, Document};

/// Result of running one attempt, before the retry policy is applied.
#[derive(Debug)]
pub enum AttemptResult {
    Completed {
        result: serde_json::Value,
        duration_ms: u64,
    },
    Failed {
        error: AnalysisError,
        duration_ms: u64,
    },
}

impl AttemptResult {
    pub fn duration_ms(&self) -> u64 {
        match self {
            AttemptResult::Completed { duration_ms, .. }
            | AttemptResult::Failed { duration_ms, .. } => *duration_ms,
        }
    }

    /// Apply the retry policy for a document on its `attempt`-th claim.
    ///
    /// Success always completes. Permanent failures fail immediately.
    /// Transient failures re-queue until `max_attempts` claims have been used.
    pub fn into_completion(self, attempt: u32, max_attempts: u32) -> Completion {
        match self {
            AttemptResult::Completed { result, .. } => Completion::Succeeded(result),
            AttemptResult::Failed {
                error: AnalysisError::Permanent(reason),
                ..
            } => Completion::Failed(reason),
            AttemptResult::Failed {
                error: AnalysisError::Transient(reason),
                ..
            } => {
                if attempt < max_attempts {
                    Completion::Retry(reason)
                } else {
                    Completion::Failed(format!(
                        "exhausted {attempt}/{max_attempts} attempts: {reason}"
                    ))
                }
            }
        }
    }
}

/// Runs attempts against the content and analysis collaborators.
#[derive(Clone)]
pub struct AttemptRunner {
    content: Arc<dyn ContentSource>,
    analyzer: Arc<dyn Analyzer>,
    timeout: Duration,
}

impl AttemptRunner {
    pub fn new(
        content: Arc<dyn ContentSource>,
        analyzer: Arc<dyn Analyzer>,
        timeout: Duration,
    ) -> Self {
        Self {
            content,
            analyzer,
            timeout,
        }
    }

    pub async fn run(&self, doc: &Document) -> AttemptResult {
        let start = Instant::now();
        let elapsed = |start: Instant| start.elapsed().as_millis() as u64;

        let content = match self.content.load(doc).await {
            Ok(content) => content,
            Err(e) => {
                warn!(document_id = %doc.id, error = %e, "content unavailable");
                let error = match e {
                    ContentError::Missing(_) | ContentError::InvalidReference(_) => {
                        AnalysisError::Permanent(e.to_string())
                    }
                    ContentError::Unreadable(_) => AnalysisError::Transient(e.to_string()),
                };
                return AttemptResult::Failed {
                    error,
                    duration_ms: elapsed(start),
                };
            }
        };

        debug!(
            document_id = %doc.id,
            bytes = content.bytes.len(),
            timeout_ms = self.timeout.as_millis() as u64,
            "invoking analyzer"
        );

        let outcome =
            tokio::time::timeout(self.timeout, self.analyzer.analyze(content, self.timeout)).await;

        match outcome {
            Ok(Ok(result)) => AttemptResult::Completed {
                result,
                duration_ms: elapsed(start),
            },
            Ok(Err(error)) => AttemptResult::Failed {
                error,
                duration_ms: elapsed(start),
            },
            Err(_) => AttemptResult::Failed {
                error: AnalysisError::Transient(format!(
                    "analysis timed out after {:?}",
                    self.timeout
                )),
                duration_ms: elapsed(start),
            },
        }
    }
}
