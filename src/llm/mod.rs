//! LLM-backed analyzer via rig-core.
//!
//! [`anthropic_client`] builds an Anthropic [`Client`] from a
//! [`SecretString`]-wrapped API key; [`LlmAnalyzer`] uses it to extract
//! entities, relations and situations from document text.
//!
//! [`Client`]: rig::providers::anthropic::Client
//! [`SecretString`]: secrecy::SecretString

use std::time::Duration;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use secrecy::{ExposeSecret, SecretString};
use tracing::{Instrument, debug};

use crate::analyzer::{Analysis, AnalysisError, Analyzer};
use crate::content::Content;
use crate::telemetry::genai::start_chat_span;

const PREAMBLE: &str = "You extract structured knowledge from documents. \
Reply with a single JSON object and nothing else, of the form \
{\"entities\": [{\"surface\": str, \"concept\": str}], \
\"relations\": [{\"subject\": entity, \"predicate\": str, \"argument\": entity, \"context\": str}], \
\"situations\": [object]}. \
`surface` is the text as it appears; `concept` is its general category.";

/// Create an Anthropic client from a secret API key.
///
/// # Errors
/// Returns an error if the underlying HTTP client cannot be constructed.
pub fn anthropic_client(
    api_key: &SecretString,
) -> Result<rig::providers::anthropic::Client, rig::http_client::Error> {
    rig::providers::anthropic::Client::new(api_key.expose_secret())
}

pub struct LlmAnalyzer {
    client: rig::providers::anthropic::Client,
    model: String,
    max_tokens: u64,
}

impl LlmAnalyzer {
    pub fn new(client: rig::providers::anthropic::Client, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: 4096,
        }
    }
}

/// Decode document bytes as text, rejecting what no model can read.
pub fn document_text(content: &Content) -> Result<&str, AnalysisError> {
    let text = std::str::from_utf8(&content.bytes).map_err(|_| {
        AnalysisError::Permanent(format!("{} is not UTF-8 text", content.filename))
    })?;
    if text.trim().is_empty() {
        return Err(AnalysisError::Permanent(format!(
            "{} has no text content",
            content.filename
        )));
    }
    Ok(text)
}

#[async_trait]
impl Analyzer for LlmAnalyzer {
    async fn analyze(
        &self,
        content: Content,
        timeout: Duration,
    ) -> Result<serde_json::Value, AnalysisError> {
        let text = document_text(&content)?;

        let agent = self
            .client
            .agent(&self.model)
            .preamble(PREAMBLE)
            .max_tokens(self.max_tokens)
            .build();

        let span = start_chat_span(&self.model, "anthropic");
        let response = tokio::time::timeout(timeout, agent.prompt(text))
            .instrument(span)
            .await
            .map_err(|_| AnalysisError::Transient(format!("model call timed out after {timeout:?}")))?
            .map_err(|e| AnalysisError::Transient(format!("model call failed: {e}")))?;

        debug!(chars = response.len(), "model responded");

        let analysis = Analysis::from_model_output(&response)?;
        serde_json::to_value(analysis)
            .map_err(|e| AnalysisError::Transient(format!("serialize analysis: {e}")))
    }
}
