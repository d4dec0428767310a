//! AWS Bedrock transport for Anthropic and Meta models
//!
//! Uses the default AWS credential chain. Bedrock has no `n` parameter, so
//! each sample is its own `invoke_model` call, made one after another, and
//! a failed sample costs only itself.

use async_trait::async_trait;
use aws_sdk_bedrockruntime::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_bedrockruntime::operation::invoke_model::InvokeModelError;
use aws_sdk_bedrockruntime::{Client, primitives::Blob};
use tokio::sync::OnceCell;

use crate::model::{CompletionChoice, CompletionRequest, CompletionResponse};
use crate::service::llm::body::{ProviderResponse, bedrock_body};
use crate::service::llm::{LlmTransport, TransportError};

static CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Shared Bedrock client, built on first use
async fn client() -> &'static Client {
    CLIENT
        .get_or_init(|| async {
            tracing::info!("Initializing AWS Bedrock client");
            let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            Client::new(&config)
        })
        .await
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BedrockTransport;

#[async_trait]
impl LlmTransport for BedrockTransport {
    async fn invoke(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, TransportError> {
        let client = client().await;
        let body = serde_json::to_vec(&bedrock_body(request))?;

        let completion = collect_samples(request, |index| {
            let body = body.clone();
            async move {
                tracing::debug!(
                    submission_id = %request.submission_id,
                    model = %request.route.model_id,
                    sample = index,
                    "Invoking Bedrock model"
                );
                let output = client
                    .invoke_model()
                    .model_id(&request.route.model_id)
                    .content_type("application/json")
                    .accept("application/json")
                    .body(Blob::new(body))
                    .send()
                    .await
                    .map_err(classify_sdk_error)?;
                Ok(ProviderResponse::decode(request.route.family, output.body().as_ref())?
                    .into_completion())
            }
        })
        .await?;

        tracing::debug!(
            submission_id = %request.submission_id,
            choices = completion.choices.len(),
            total_tokens = completion.usage.total_tokens,
            "Bedrock call succeeded"
        );

        Ok(completion)
    }
}

/// Run `num_responses` samples in order and keep every one that succeeds
///
/// A failed sample is dropped. Errors that would repeat for the same prompt
/// stop sampling early. The first error is returned only when no sample
/// succeeded.
async fn collect_samples<F, Fut>(
    request: &CompletionRequest,
    mut sample: F,
) -> Result<CompletionResponse, TransportError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<CompletionResponse, TransportError>>,
{
    let mut completion = CompletionResponse::default();
    let mut first_error = None;

    for index in 0..request.num_responses.max(1) as usize {
        match sample(index).await {
            Ok(response) => {
                completion.usage.add(&response.usage);
                completion
                    .choices
                    .extend(response.choices.into_iter().map(|choice| CompletionChoice {
                        index,
                        ..choice
                    }));
            }
            Err(e) => {
                tracing::warn!(
                    submission_id = %request.submission_id,
                    sample = index,
                    error = %e,
                    "Bedrock sample failed"
                );
                let repeats = matches!(
                    e,
                    TransportError::ContextLengthExceeded(_) | TransportError::ClientError { .. }
                );
                first_error.get_or_insert(e);
                if repeats {
                    break;
                }
            }
        }
    }

    match first_error {
        Some(e) if completion.choices.is_empty() => Err(e),
        _ => Ok(completion),
    }
}

fn classify_sdk_error<R>(e: SdkError<InvokeModelError, R>) -> TransportError
where
    R: std::fmt::Debug,
{
    match e {
        SdkError::TimeoutError(_) => TransportError::Timeout,
        SdkError::ServiceError(service) => classify_service_error(service.err()),
        other => TransportError::Bedrock(format!("{other:?}")),
    }
}

fn classify_service_error(e: &InvokeModelError) -> TransportError {
    let message = e.message().unwrap_or_default().to_string();
    tracing::error!(code = ?e.code(), message = %message, "Error calling the API");

    match e {
        InvokeModelError::ValidationException(_) if is_context_length(&message) => {
            TransportError::ContextLengthExceeded(message)
        }
        InvokeModelError::ModelTimeoutException(_) => TransportError::Timeout,
        InvokeModelError::InternalServerException(_) => TransportError::ServerError {
            status: 500,
            body: message,
        },
        InvokeModelError::ServiceUnavailableException(_) => TransportError::ServerError {
            status: 503,
            body: message,
        },
        _ => TransportError::ClientError {
            status: 400,
            body: message,
        },
    }
}

fn is_context_length(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("too long") || message.contains("too many tokens")
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_bedrockruntime::types::error::{
        InternalServerException, ModelTimeoutException, ThrottlingException, ValidationException,
    };
    use std::sync::Mutex;

    use crate::model::{FinishReason, TokenUsage};
    use crate::service::llm::body::tests::request;

    fn sample(text: &str) -> CompletionResponse {
        CompletionResponse {
            choices: vec![CompletionChoice {
                index: 0,
                text: Some(text.to_string()),
                finish_reason: Some(FinishReason::EndTurn),
            }],
            usage: TokenUsage::new(10, 5),
        }
    }

    async fn run(
        script: Vec<Result<CompletionResponse, TransportError>>,
    ) -> (Result<CompletionResponse, TransportError>, usize) {
        let script = Mutex::new(script);
        let calls = Mutex::new(0);
        let result = collect_samples(&request("bedrock.anthropic.claude-3-5-sonnet-20240620-v1:0"), |_| {
            *calls.lock().unwrap() += 1;
            let next = script.lock().unwrap().remove(0);
            async move { next }
        })
        .await;
        let calls = *calls.lock().unwrap();
        (result, calls)
    }

    fn server_error() -> TransportError {
        TransportError::ServerError {
            status: 503,
            body: "busy".to_string(),
        }
    }

    #[tokio::test]
    async fn test_failed_sample_keeps_the_others() {
        let (result, calls) = run(vec![Ok(sample("one")), Err(server_error()), Ok(sample("three"))]).await;
        let completion = result.unwrap();
        assert_eq!(calls, 3);
        let indexes: Vec<_> = completion.choices.iter().map(|c| c.index).collect();
        assert_eq!(indexes, vec![0, 2]);
        assert_eq!(completion.choices[1].text.as_deref(), Some("three"));
        assert_eq!(completion.usage.total_tokens, 30);
    }

    #[tokio::test]
    async fn test_all_samples_failing_returns_first_error() {
        let (result, calls) = run(vec![
            Err(server_error()),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
        ])
        .await;
        assert_eq!(calls, 3);
        assert!(matches!(result, Err(TransportError::ServerError { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_context_length_stops_sampling() {
        let (result, calls) = run(vec![
            Ok(sample("one")),
            Err(TransportError::ContextLengthExceeded("too long".to_string())),
            Ok(sample("three")),
        ])
        .await;
        assert_eq!(calls, 2);
        assert_eq!(result.unwrap().choices.len(), 1);

        let (result, calls) = run(vec![
            Err(TransportError::ContextLengthExceeded("too long".to_string())),
            Ok(sample("two")),
            Ok(sample("three")),
        ])
        .await;
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(TransportError::ContextLengthExceeded(_))));
    }

    #[test]
    fn test_validation_too_long_is_context_length() {
        let err = InvokeModelError::ValidationException(
            ValidationException::builder()
                .message("Input is too long for requested model.")
                .build(),
        );
        assert!(matches!(
            classify_service_error(&err),
            TransportError::ContextLengthExceeded(_)
        ));
    }

    #[test]
    fn test_other_validation_is_client_error() {
        let err = InvokeModelError::ValidationException(
            ValidationException::builder()
                .message("Malformed input request")
                .build(),
        );
        assert!(matches!(
            classify_service_error(&err),
            TransportError::ClientError { status: 400, .. }
        ));
    }

    #[test]
    fn test_server_and_timeout_errors() {
        let err = InvokeModelError::InternalServerException(
            InternalServerException::builder().message("boom").build(),
        );
        assert!(matches!(
            classify_service_error(&err),
            TransportError::ServerError { status: 500, .. }
        ));

        let err = InvokeModelError::ModelTimeoutException(
            ModelTimeoutException::builder().message("slow").build(),
        );
        assert!(matches!(classify_service_error(&err), TransportError::Timeout));

        let err = InvokeModelError::ThrottlingException(
            ThrottlingException::builder().message("slow down").build(),
        );
        assert!(matches!(
            classify_service_error(&err),
            TransportError::ClientError { .. }
        ));
    }
}
