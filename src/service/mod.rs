pub mod batch;
pub mod cache;
pub mod cache_keys;
pub mod features;
pub mod grader;
pub mod llm;
pub mod response;

pub use cache::{CacheError, FileResponseCache, RedisResponseCache, ResponseCache};
pub use grader::{GradeError, GradeRequest, Grader};
pub use llm::{BedrockTransport, LlmTransport, OpenAiTransport, RoutedTransport, TransportError};
