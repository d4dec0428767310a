//! Grading orchestrator
//!
//! Runs one submission through the cheapest path that can label it: the
//! blank-program shortcut, decision trees for flagged criteria, and finally
//! the LLM with per-choice validation and consensus.

mod error;
pub mod examples;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

pub use error::GradeError;

use crate::model::config::{Config, GradingDefaults};
use crate::model::{
    Agent, CompletionChoice, CompletionRequest, EvidenceLabel, FewShotExample, GradeMetadata,
    GradeResponse, LabelRow, LabelSet, ModelFamily, ModelRoute, Provider, ResponseType, Rubric,
    TokenUsage,
};
use crate::service::cache::{CacheError, ResponseCache};
use crate::service::cache_keys::{SubmissionKey, generate_submission_id};
use crate::service::features::{self, TreeAssessment};
use crate::service::llm::{LlmTransport, TransportError};
use crate::service::response::{ResponseError, consensus, label_set_from_text};

/// Observation and reason given to every criterion of a blank program
pub const EMPTY_PROGRAM: &str = "The program is empty.";

/// One submission to grade
#[derive(Debug, Clone)]
pub struct GradeRequest {
    pub code: String,
    pub prompt: String,
    /// Rubric CSV text
    pub rubric: String,
    pub model: String,
    pub examples: Vec<FewShotExample>,
    pub num_responses: u32,
    pub temperature: f32,
    pub use_cache: bool,
    pub write_cache: bool,
    /// Criteria to label with decision trees when one exists
    pub feature_criteria: Vec<String>,
    pub lesson: Option<String>,
    pub remove_comments: bool,
    pub response_type: ResponseType,
    /// Derived from the grading inputs when absent
    pub submission_id: Option<String>,
    /// Overrides the configured OpenAI key
    pub api_key: Option<String>,
}

impl GradeRequest {
    pub fn new(
        code: impl Into<String>,
        prompt: impl Into<String>,
        rubric: impl Into<String>,
        defaults: &GradingDefaults,
    ) -> Self {
        Self {
            code: code.into(),
            prompt: prompt.into(),
            rubric: rubric.into(),
            model: defaults.model.clone(),
            examples: Vec::new(),
            num_responses: defaults.num_responses,
            temperature: defaults.temperature,
            use_cache: false,
            write_cache: false,
            feature_criteria: Vec::new(),
            lesson: None,
            remove_comments: false,
            response_type: defaults.response_type,
            submission_id: None,
            api_key: None,
        }
    }

    fn derive_submission_id(&self) -> String {
        generate_submission_id(&SubmissionKey {
            code: &self.code,
            rubric: &self.rubric,
            prompt: &self.prompt,
            model: &self.model,
            examples: &self.examples,
            num_responses: self.num_responses,
            temperature: self.temperature,
            feature_criteria: &self.feature_criteria,
            lesson: self.lesson.as_deref(),
            remove_comments: self.remove_comments,
        })
    }
}

/// Labels and metadata produced by one grading path
struct Outcome {
    agent: Agent,
    model: Option<String>,
    usage: Option<TokenUsage>,
    data: LabelSet,
    feature_labeled: Vec<String>,
    valid_responses: usize,
}

pub struct Grader {
    transport: Arc<dyn LlmTransport>,
    cache: Option<Arc<dyn ResponseCache>>,
    openai_api_key: Option<String>,
    timeout: Duration,
    max_tokens: u32,
}

impl Grader {
    pub fn new(transport: Arc<dyn LlmTransport>, config: &Config) -> Self {
        Self {
            transport,
            cache: None,
            openai_api_key: config.openai.api_key.clone(),
            timeout: config.grading.timeout(),
            max_tokens: config.grading.max_tokens,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Grade one submission
    pub async fn grade(&self, request: GradeRequest) -> Result<GradeResponse, GradeError> {
        let rubric = Rubric::parse(&request.rubric)?;
        let submission_id = request
            .submission_id
            .clone()
            .unwrap_or_else(|| request.derive_submission_id());

        // Cached results are served without credentials or a reachable model
        if request.use_cache
            && let Some(cached) = self.read_cache(&submission_id).await
        {
            return Ok(cached);
        }

        examples::validate_examples(&request.examples, &rubric, request.response_type)?;
        let route = ModelRoute::parse(&request.model)?;
        let api_key = self.resolve_api_key(&route, &request)?;
        if request.num_responses == 0 {
            return Err(GradeError::InvalidRequest(
                "num_responses must be at least 1".to_string(),
            ));
        }

        let start = Instant::now();
        let code = if request.remove_comments {
            features::remove_comments(&request.code)
        } else {
            request.code.clone()
        };

        let outcome = if code.trim().is_empty() {
            tracing::info!(submission_id = %submission_id, "Program is empty, skipping LLM");
            Outcome {
                agent: Agent::Static,
                model: None,
                usage: None,
                data: LabelSet::uniform(&rubric, EvidenceLabel::No, EMPTY_PROGRAM),
                feature_labeled: Vec::new(),
                valid_responses: 0,
            }
        } else {
            let feature_rows = label_with_features(&code, &rubric, &request);
            if feature_rows.len() == rubric.len() {
                tracing::info!(
                    submission_id = %submission_id,
                    criteria = feature_rows.len(),
                    "All criteria labeled from code features, skipping LLM"
                );
                Outcome {
                    agent: Agent::CodeFeatures,
                    model: None,
                    usage: None,
                    feature_labeled: feature_rows.iter().map(|r| r.key_concept.clone()).collect(),
                    data: LabelSet::from_rows(feature_rows, &rubric),
                    valid_responses: 0,
                }
            } else {
                let completion = CompletionRequest {
                    route,
                    prompt: request.prompt.clone(),
                    rubric: request.rubric.clone(),
                    examples: request.examples.clone(),
                    code,
                    num_responses: request.num_responses,
                    temperature: request.temperature,
                    max_tokens: self.max_tokens,
                    api_key,
                    submission_id: submission_id.clone(),
                };
                self.label_with_llm(completion, &rubric, request.response_type, feature_rows)
                    .await?
            }
        };

        let elapsed = start.elapsed();
        tracing::info!(
            submission_id = %submission_id,
            agent = ?outcome.agent,
            elapsed_ms = elapsed.as_millis() as u64,
            total_tokens = outcome.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0),
            "Grading succeeded"
        );

        let response = GradeResponse {
            metadata: GradeMetadata {
                submission_id: submission_id.clone(),
                agent: outcome.agent,
                model: outcome.model,
                time: elapsed.as_secs_f64(),
                usage: outcome.usage,
                feature_labeled: outcome.feature_labeled,
                valid_responses: outcome.valid_responses,
                created_at: Utc::now(),
            },
            data: outcome.data,
        };

        if request.write_cache
            && let Some(cache) = &self.cache
            && let Err(e) = cache.put(&submission_id, &response).await
        {
            tracing::warn!(submission_id = %submission_id, error = %e, "Failed to cache grade response");
        }

        Ok(response)
    }

    /// OpenAI needs a key; Bedrock uses the AWS credential chain
    fn resolve_api_key(
        &self,
        route: &ModelRoute,
        request: &GradeRequest,
    ) -> Result<Option<String>, GradeError> {
        let key = request
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.openai_api_key.clone());
        match (route.provider, key) {
            (Provider::OpenAi, None) => Err(GradeError::MissingApiKey),
            (Provider::OpenAi, key) => Ok(key),
            (Provider::Bedrock, _) => Ok(None),
        }
    }

    async fn read_cache(&self, submission_id: &str) -> Option<GradeResponse> {
        let cache = self.cache.as_ref()?;
        match cache.get(submission_id).await {
            Ok(response) => {
                tracing::info!(submission_id = %submission_id, "Returning cached grade response");
                Some(response)
            }
            Err(CacheError::Miss(_)) => None,
            Err(e) => {
                tracing::warn!(submission_id = %submission_id, error = %e, "Failed to read grade cache");
                None
            }
        }
    }

    async fn label_with_llm(
        &self,
        completion: CompletionRequest,
        rubric: &Rubric,
        response_type: ResponseType,
        feature_rows: Vec<LabelRow>,
    ) -> Result<Outcome, GradeError> {
        let submission_id = completion.submission_id.clone();
        let model = completion.route.model_id.clone();
        let agent = match completion.route.family {
            ModelFamily::Gpt => Agent::OpenAi,
            ModelFamily::Claude | ModelFamily::ClaudeText => Agent::Anthropic,
            ModelFamily::Llama => Agent::Meta,
        };

        tracing::debug!(
            submission_id = %submission_id,
            model = %model,
            num_responses = completion.num_responses,
            "Requesting LLM assessment"
        );

        let response = match tokio::time::timeout(self.timeout, self.transport.invoke(&completion))
            .await
        {
            Ok(result) => result.map_err(|e| self.transport_error(&submission_id, e))?,
            Err(_) => {
                tracing::error!(
                    submission_id = %submission_id,
                    seconds = self.timeout.as_secs(),
                    "request timed out"
                );
                return Err(GradeError::Timeout {
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let samples = label_sets_from_choices(&response.choices, rubric, response_type, &submission_id)?;
        let valid_responses = samples.len();
        let labels = match samples.as_slice() {
            [single] => single.clone(),
            _ => consensus(&samples, &submission_id),
        };

        let feature_labeled = feature_rows.iter().map(|r| r.key_concept.clone()).collect();
        Ok(Outcome {
            agent,
            model: Some(model),
            usage: Some(response.usage),
            data: labels.merge(feature_rows),
            feature_labeled,
            valid_responses,
        })
    }

    fn transport_error(&self, submission_id: &str, e: TransportError) -> GradeError {
        match e {
            TransportError::Timeout => GradeError::Timeout {
                seconds: self.timeout.as_secs(),
            },
            TransportError::ServerError { status, body } => GradeError::ProviderServer {
                status,
                message: body,
            },
            TransportError::ContextLengthExceeded(message) => GradeError::RequestTooLarge(message),
            TransportError::MissingApiKey => GradeError::MissingApiKey,
            other => {
                tracing::error!(submission_id = %submission_id, error = %other, "Error calling the API");
                GradeError::NoResponse(other.to_string())
            }
        }
    }
}

/// Label flagged criteria that have a decision tree
fn label_with_features(code: &str, rubric: &Rubric, request: &GradeRequest) -> Vec<LabelRow> {
    let lesson = request.lesson.as_deref();
    let flagged: Vec<_> = rubric
        .criteria()
        .iter()
        .filter(|c| request.feature_criteria.iter().any(|f| *f == c.key_concept))
        .filter(|c| {
            let supported = features::has_tree(&c.key_concept, lesson);
            if !supported {
                tracing::warn!(
                    criterion = %c.key_concept,
                    lesson = ?lesson,
                    "No decision tree for criterion, leaving it to the LLM"
                );
            }
            supported
        })
        .collect();

    if flagged.is_empty() {
        return Vec::new();
    }

    let code_features = features::extract_features(code);
    let counts = code_features.object_counts();
    flagged
        .into_iter()
        .filter_map(|criterion| {
            let TreeAssessment {
                label,
                rule,
                evidence,
            } = features::assess(&code_features, &criterion.key_concept, lesson)?;
            Some(LabelRow {
                key_concept: criterion.key_concept.clone(),
                observations: format!(
                    "{rule} Found {} shapes, {} sprites and {} text elements.",
                    counts.shapes, counts.sprites, counts.text
                ),
                label,
                reason: criterion.description(label).to_string(),
                evidence: (!evidence.is_empty()).then(|| evidence.join("\n")),
            })
        })
        .collect()
}

/// Parse and validate every choice
///
/// A failing choice is logged and skipped, except the last one when nothing
/// has succeeded yet: its error becomes the grading error.
fn label_sets_from_choices(
    choices: &[CompletionChoice],
    rubric: &Rubric,
    response_type: ResponseType,
    submission_id: &str,
) -> Result<Vec<LabelSet>, GradeError> {
    if choices.is_empty() {
        return Err(GradeError::NoResponse("no choices returned".to_string()));
    }

    let last = choices.len() - 1;
    let mut samples = Vec::with_capacity(choices.len());
    for (position, choice) in choices.iter().enumerate() {
        let text = choice.text.as_deref().unwrap_or_default();
        match label_set_from_text(text, rubric, response_type) {
            Ok(set) => samples.push(set),
            Err(e) if position == last && samples.is_empty() => {
                tracing::error!(
                    submission_id = %submission_id,
                    choice = choice.index,
                    error = %e,
                    finish_reason = ?choice.finish_reason,
                    "Invalid response"
                );
                return Err(classify_final_failure(e, choice));
            }
            Err(e) => {
                tracing::error!(
                    submission_id = %submission_id,
                    choice = choice.index,
                    error = %e,
                    "Invalid response"
                );
            }
        }
    }
    Ok(samples)
}

/// Output cut off by the token limit has no structure to parse
fn classify_final_failure(e: ResponseError, choice: &CompletionChoice) -> GradeError {
    let truncated = choice
        .finish_reason
        .as_ref()
        .is_some_and(|reason| reason.is_truncation());
    if e.is_structural() && truncated {
        GradeError::RequestTooLarge(format!("response truncated: {e}"))
    } else {
        GradeError::InvalidResponse(e)
    }
}
