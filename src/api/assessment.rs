//! REST API endpoint for rubric assessments

use std::str::FromStr;
use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, http::header, post, web};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::{IntoParams, ToSchema};

use crate::api::error::ApiError;
use crate::model::config::Config;
use crate::model::{FewShotExample, GradeMetadata, LabelSet, ResponseType};
use crate::service::grader::{GradeRequest, Grader};

/// Assessment parameters, from the form body, the query string, or both
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct AssessmentForm {
    /// Student program
    pub code: Option<String>,
    /// Grading instructions
    pub prompt: Option<String>,
    /// Rubric CSV
    pub rubric: Option<String>,
    /// JSON list of `[code, expected response]` pairs
    pub examples: Option<String>,
    /// OpenAI key overriding the server's
    #[serde(rename = "api-key")]
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// Any value other than "0" strips comments
    #[serde(rename = "remove-comments")]
    pub remove_comments: Option<String>,
    #[serde(rename = "num-responses")]
    pub num_responses: Option<String>,
    pub temperature: Option<String>,
    /// `tsv` or `json`
    #[serde(rename = "response-type")]
    pub response_type: Option<String>,
    /// JSON list of criteria to label from code features
    #[serde(rename = "code-feature-extractor")]
    pub code_feature_extractor: Option<String>,
    pub lesson: Option<String>,
}

impl AssessmentForm {
    /// Fill fields missing here from `fallback`
    fn or(self, fallback: AssessmentForm) -> AssessmentForm {
        AssessmentForm {
            code: self.code.or(fallback.code),
            prompt: self.prompt.or(fallback.prompt),
            rubric: self.rubric.or(fallback.rubric),
            examples: self.examples.or(fallback.examples),
            api_key: self.api_key.or(fallback.api_key),
            model: self.model.or(fallback.model),
            remove_comments: self.remove_comments.or(fallback.remove_comments),
            num_responses: self.num_responses.or(fallback.num_responses),
            temperature: self.temperature.or(fallback.temperature),
            response_type: self.response_type.or(fallback.response_type),
            code_feature_extractor: self.code_feature_extractor.or(fallback.code_feature_extractor),
            lesson: self.lesson.or(fallback.lesson),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AssessmentResponse {
    #[schema(value_type = Object)]
    pub metadata: GradeMetadata,
    /// One row per rubric criterion
    #[schema(value_type = Vec<Object>)]
    pub data: LabelSet,
}

/// Grade a student program against a rubric
#[utoipa::path(
    post,
    path = "/assessment",
    params(AssessmentForm),
    responses(
        (status = 200, description = "Assessment completed", body = AssessmentResponse),
        (status = 400, description = "Invalid request or model response", body = crate::api::error::ErrorResponse),
        (status = 401, description = "Missing Authorization header"),
        (status = 403, description = "Invalid Authorization header"),
        (status = 413, description = "Request too large for the model"),
        (status = 502, description = "LLM provider error"),
        (status = 504, description = "LLM provider timed out")
    ),
    tag = "assessment"
)]
#[post("/assessment")]
pub async fn post_assessment(
    req: HttpRequest,
    grader: web::Data<Arc<Grader>>,
    config: web::Data<Config>,
    query: web::Query<AssessmentForm>,
    form: Option<web::Form<AssessmentForm>>,
) -> Result<HttpResponse, ApiError> {
    authorize(&req, config.proxy_api_key.as_deref())?;

    // Body fields win over query fields of the same name
    let form = match form {
        Some(form) => form.into_inner().or(query.into_inner()),
        None => query.into_inner(),
    };
    let request = build_request(form, &config)?;

    tracing::debug!(
        model = %request.model,
        num_responses = request.num_responses,
        feature_criteria = request.feature_criteria.len(),
        "Received assessment request"
    );

    let response = grader.grade(request).await?;

    Ok(HttpResponse::Ok().json(AssessmentResponse {
        metadata: response.metadata,
        data: response.data,
    }))
}

/// Check the `Authorization` header against the configured proxy key
fn authorize(req: &HttpRequest, expected: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Please provide an API key".to_string()))?;

    if constant_time_eq(provided, expected) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "The provided API key is not valid".to_string(),
        ))
    }
}

/// Compares fixed-length digests so timing does not depend on the key
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = Sha256::digest(a.as_bytes());
    let b = Sha256::digest(b.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn build_request(form: AssessmentForm, config: &Config) -> Result<GradeRequest, ApiError> {
    let required = |value: Option<String>, name: &str| {
        value.ok_or_else(|| ApiError::BadRequest(format!("`{name}` is required")))
    };
    let code = required(form.code, "code")?;
    let prompt = required(form.prompt, "prompt")?;
    let rubric = required(form.rubric, "rubric")?;

    let mut request = GradeRequest::new(code, prompt, rubric, &config.grading);

    if let Some(model) = form.model.filter(|m| !m.is_empty()) {
        request.model = model;
    }
    request.api_key = form.api_key.filter(|k| !k.is_empty());
    request.remove_comments = form.remove_comments.is_some_and(|v| v != "0");
    if let Some(n) = form.num_responses {
        request.num_responses = parse_number(&n)?;
    }
    if let Some(t) = form.temperature {
        request.temperature = parse_number(&t)?;
    }
    if let Some(response_type) = form.response_type {
        request.response_type =
            ResponseType::from_str(&response_type).map_err(ApiError::BadRequest)?;
    }
    if let Some(examples) = form.examples.filter(|e| !e.trim().is_empty()) {
        let pairs: Vec<(String, String)> = serde_json::from_str(&examples)
            .map_err(|e| ApiError::BadRequest(format!("`examples` is not a list of pairs: {e}")))?;
        request.examples = pairs
            .into_iter()
            .map(|(code, response)| FewShotExample { code, response })
            .collect();
    }
    if let Some(criteria) = form.code_feature_extractor.filter(|c| !c.trim().is_empty()) {
        request.feature_criteria = serde_json::from_str(&criteria).map_err(|e| {
            ApiError::BadRequest(format!("`code-feature-extractor` is not a list of names: {e}"))
        })?;
    }
    request.lesson = form.lesson.filter(|l| !l.is_empty());

    Ok(request)
}

fn parse_number<T: FromStr>(value: &str) -> Result<T, ApiError> {
    value.trim().parse().map_err(|_| {
        ApiError::BadRequest("One of the arguments is not parseable as a number".to_string())
    })
}

/// Configure assessment routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(post_assessment);
}
