pub mod config;
pub mod features;
pub mod label;
pub mod llm;
pub mod rubric;

pub use config::{CacheBackend, Config};
pub use features::CodeFeatures;
pub use label::{Agent, GradeMetadata, GradeResponse, LabelRow, LabelSet, ResponseType};
pub use llm::{
    CompletionChoice, CompletionRequest, CompletionResponse, FewShotExample, FinishReason,
    ModelFamily, ModelRoute, Provider, TokenUsage,
};
pub use rubric::{Criterion, EvidenceLabel, Rubric, RubricError};
