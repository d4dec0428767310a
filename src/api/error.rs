//! Error responses for the grading API
//!
//! Every failure leaves the service as a JSON body carrying a fresh request id.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::service::grader::GradeError;

/// JSON body of every non-2xx response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Machine-readable kind, e.g. `request_too_large`
    pub error: String,
    pub message: String,
    /// Matches the `request_id` field of the server log line
    pub request_id: String,
}

/// Failure of an HTTP handler, mapped onto a status code
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ApiError {
    /// Malformed form fields, rubric, examples or model output (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or wrong proxy key (401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Prompt and code do not fit the model context (413)
    #[error("Request too large: {0}")]
    PayloadTooLarge(String),

    /// LLM provider failed or returned nothing usable (502)
    #[error("External service error: {0}")]
    ExternalService(String),

    /// LLM provider did not answer in time (504)
    #[error("External service timed out: {0}")]
    GatewayTimeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            ApiError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let error_type = match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::PayloadTooLarge(_) => "request_too_large",
            ApiError::ExternalService(_) => "external_service_error",
            ApiError::GatewayTimeout(_) => "timeout",
            ApiError::Internal(_) => "internal_error",
        };

        let request_id = Uuid::new_v4().to_string();
        if status.is_server_error() {
            tracing::error!(%request_id, error_type, status = status.as_u16(), message = %self, "Assessment failed");
        } else {
            tracing::warn!(%request_id, error_type, status = status.as_u16(), message = %self, "Assessment rejected");
        }

        HttpResponse::build(status).json(ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
            request_id,
        })
    }
}

impl From<GradeError> for ApiError {
    fn from(err: GradeError) -> Self {
        match err {
            GradeError::MissingApiKey
            | GradeError::UnsupportedModel(_)
            | GradeError::KeyConceptMismatch { .. }
            | GradeError::InvalidExample { .. }
            | GradeError::InvalidRequest(_)
            | GradeError::Rubric(_)
            | GradeError::InvalidResponse(_) => ApiError::BadRequest(err.to_string()),
            GradeError::RequestTooLarge(_) => ApiError::PayloadTooLarge(err.to_string()),
            GradeError::ProviderServer { .. } | GradeError::NoResponse(_) => {
                ApiError::ExternalService(err.to_string())
            }
            GradeError::Timeout { .. } => ApiError::GatewayTimeout(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_error_status_mapping() {
        let status = |e: GradeError| ApiError::from(e).status_code();
        assert_eq!(status(GradeError::MissingApiKey), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(GradeError::RequestTooLarge("big".to_string())),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status(GradeError::ProviderServer {
                status: 503,
                message: "down".to_string()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(GradeError::NoResponse("nothing".to_string())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(GradeError::Timeout { seconds: 150 }),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
