use std::collections::BTreeSet;

use thiserror::Error;

use crate::model::RubricError;
use crate::model::llm::UnsupportedModel;
use crate::service::response::ResponseError;

/// Error type for grading operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GradeError {
    #[error("no API key provided for OpenAI models")]
    MissingApiKey,

    #[error(transparent)]
    UnsupportedModel(#[from] UnsupportedModel),

    #[error(
        "Mismatch between rubric and example key concepts for example {index}: unexpected: {unexpected:?} missing: {missing:?}"
    )]
    KeyConceptMismatch {
        index: usize,
        unexpected: BTreeSet<String>,
        missing: BTreeSet<String>,
    },

    #[error("example {index} could not be read: {reason}")]
    InvalidExample { index: usize, reason: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid rubric: {0}")]
    Rubric(#[from] RubricError),

    #[error("invalid response: {0}")]
    InvalidResponse(#[from] ResponseError),

    #[error("request too large: {0}")]
    RequestTooLarge(String),

    #[error("LLM provider error {status}: {message}")]
    ProviderServer { status: u16, message: String },

    #[error("request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("AI assessment failed: {0}")]
    NoResponse(String),
}
