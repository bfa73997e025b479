//! Model provider seam.
//!
//! The analyze handler only knows about `AnalysisProvider`: hand it the
//! validated documents, get back a schema-conforming `AnalysisResult` or a
//! `ProviderError`.  `OpenAiProvider` talks to any OpenAI-compatible
//! chat-completions endpoint (OpenAI itself or an AI gateway).

use thiserror::Error;

use crate::model::AnalysisResult;
use crate::validation::ValidatedDocument;

pub mod openai;
pub mod prompt;

pub use self::openai::{OpenAiConfig, OpenAiProvider};

/// Message shown to clients for any provider failure.  Details stay in the
/// server log.
pub const PROVIDER_FAILURE_MESSAGE: &str = "Failed to analyze documents. Please try again later.";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("model provider is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("model provider request failed: {0}")]
    Transport(String),
    #[error("model provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model provider returned an unreadable response: {0}")]
    Malformed(String),
    #[error("model declined to produce an analysis: {0}")]
    Refused(String),
    #[error("model output does not match the analysis schema: {0}")]
    SchemaViolation(String),
}

/// Generates one structured analysis per call.  Implementations make a
/// single attempt; failures are terminal for the request.
#[async_trait::async_trait]
pub trait AnalysisProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn analyze(
        &self,
        documents: &[ValidatedDocument<'_>],
    ) -> Result<AnalysisResult, ProviderError>;
}

/// Parse raw model text into an `AnalysisResult`, enforcing the schema.
/// Anything that fails here never leaves the provider layer.
pub fn parse_analysis(text: &str) -> Result<AnalysisResult, ProviderError> {
    let result: AnalysisResult = serde_json::from_str(text.trim())
        .map_err(|err| ProviderError::SchemaViolation(err.to_string()))?;
    result
        .check_conformance()
        .map_err(|err| ProviderError::SchemaViolation(err.to_string()))?;
    Ok(result)
}
