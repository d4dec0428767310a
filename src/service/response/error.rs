//! Error types for response normalization

use thiserror::Error;

use crate::service::response::parser::ParseError;
use crate::service::response::validation::ValidationError;

/// Why one model response could not become a label set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// No row structure could be found at all
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// Rows were found but do not match the schema or the rubric
    #[error("{0}")]
    Validation(#[from] ValidationError),
}

impl ResponseError {
    pub fn is_structural(&self) -> bool {
        matches!(self, ResponseError::Parse(_))
    }
}
