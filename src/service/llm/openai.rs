//! OpenAI chat completions transport

use async_trait::async_trait;
use reqwest::Client;

use crate::model::config::OpenAiConfig;
use crate::model::{CompletionRequest, CompletionResponse};
use crate::service::llm::body::{ProviderResponse, chat_body};
use crate::service::llm::{LlmTransport, TransportError};

const CONTEXT_LENGTH_EXCEEDED: &str = "context_length_exceeded";

/// Client for the OpenAI chat completions endpoint
pub struct OpenAiTransport {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiTransport {
    pub fn new(config: &OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl LlmTransport for OpenAiTransport {
    async fn invoke(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, TransportError> {
        let api_key = request
            .api_key
            .as_deref()
            .or(self.api_key.as_deref())
            .ok_or(TransportError::MissingApiKey)?;
        let url = format!("{}/chat/completions", self.base_url);

        tracing::debug!(
            submission_id = %request.submission_id,
            model = %request.route.model_id,
            n = request.num_responses,
            "Calling OpenAI chat completions"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&chat_body(request))
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                submission_id = %request.submission_id,
                status = status.as_u16(),
                body = %body,
                "Error calling the API"
            );
            if status.is_server_error() {
                return Err(TransportError::ServerError {
                    status: status.as_u16(),
                    body,
                });
            }
            if body.contains(CONTEXT_LENGTH_EXCEEDED) {
                return Err(TransportError::ContextLengthExceeded(body));
            }
            return Err(TransportError::ClientError {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(classify_reqwest)?;
        let completion = ProviderResponse::decode(request.route.family, &bytes)?.into_completion();

        tracing::debug!(
            submission_id = %request.submission_id,
            choices = completion.choices.len(),
            total_tokens = completion.usage.total_tokens,
            "OpenAI call succeeded"
        );

        Ok(completion)
    }
}

fn classify_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Http(e)
    }
}
