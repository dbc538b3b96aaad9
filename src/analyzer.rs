//! The analysis capability: submit content, receive a structured result or a
//! classified failure.
//!
//! The pipeline treats the result as opaque JSON. [`Analysis`] is the shape the
//! LLM-backed analyzer produces; other analyzers may return anything.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::content::Content;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    /// Unreachable, timed out, or produced garbage. Retried up to the attempt ceiling.
    #[error("transient analysis failure: {0}")]
    Transient(String),

    /// The content itself is unusable. Never retried.
    #[error("permanent analysis failure: {0}")]
    Permanent(String),
}

impl AnalysisError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalysisError::Transient(_))
    }
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyze `content`, giving up after `timeout`.
    async fn analyze(
        &self,
        content: Content,
        timeout: Duration,
    ) -> std::result::Result<serde_json::Value, AnalysisError>;
}

// ---------------------------------------------------------------------------
// Knowledge extraction result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub surface: String,
    pub concept: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub subject: Entity,
    pub predicate: String,
    pub argument: Entity,
    #[serde(default)]
    pub context: String,
}

/// Entities, relations and situations extracted from a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    /// Free-form situation frames; structure is up to the model.
    #[serde(default)]
    pub situations: Vec<serde_json::Value>,
}

impl Analysis {
    /// Parse a model response, tolerating prose or code fences around the JSON.
    pub fn from_model_output(text: &str) -> std::result::Result<Self, AnalysisError> {
        let start = text.find('{');
        let end = text.rfind('}');
        let json = match (start, end) {
            (Some(s), Some(e)) if s < e => &text[s..=e],
            _ => {
                return Err(AnalysisError::Transient(
                    "model response contained no JSON object".to_string(),
                ));
            }
        };

        let mut analysis: Analysis = serde_json::from_str(json)
            .map_err(|e| AnalysisError::Transient(format!("unparseable model response: {e}")))?;
        analysis.dedup_entities();
        Ok(analysis)
    }

    /// Drop duplicate entities, keeping first-seen order.
    pub fn dedup_entities(&mut self) {
        let mut seen = BTreeSet::new();
        self.entities.retain(|e| seen.insert(e.clone()));
    }
}
