//! LLM transports
//!
//! A transport turns a [`CompletionRequest`] into provider-specific bodies,
//! sends them, and decodes the reply into [`CompletionResponse`] choices.
//! [`RoutedTransport`] picks the provider from the request's model route.

pub mod bedrock;
pub mod body;
pub mod openai;

use async_trait::async_trait;

use crate::model::config::OpenAiConfig;
use crate::model::{CompletionRequest, CompletionResponse, Provider};

pub use bedrock::BedrockTransport;
pub use openai::OpenAiTransport;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("provider server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("provider rejected the request with status {status}: {body}")]
    ClientError { status: u16, body: String },

    #[error("no OpenAI API key configured")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("Bedrock invocation failed: {0}")]
    Bedrock(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Decode(e.to_string())
    }
}

/// Sends completion requests to an LLM provider
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn invoke(&self, request: &CompletionRequest)
    -> Result<CompletionResponse, TransportError>;
}

/// Dispatches to OpenAI or Bedrock by the request's model route
pub struct RoutedTransport {
    openai: OpenAiTransport,
    bedrock: BedrockTransport,
}

impl RoutedTransport {
    pub fn new(openai: &OpenAiConfig) -> Self {
        Self {
            openai: OpenAiTransport::new(openai),
            bedrock: BedrockTransport,
        }
    }
}

#[async_trait]
impl LlmTransport for RoutedTransport {
    async fn invoke(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, TransportError> {
        match request.route.provider {
            Provider::OpenAi => self.openai.invoke(request).await,
            Provider::Bedrock => self.bedrock.invoke(request).await,
        }
    }
}
