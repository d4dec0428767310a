//! LLM routing, request and response types shared by the transports

use serde::{Deserialize, Serialize};

/// Model used when a request does not name one
pub const DEFAULT_MODEL: &str = "bedrock.anthropic.claude-3-5-sonnet-20240620-v1:0";

/// Prefix routing a model identifier to AWS Bedrock
pub const BEDROCK_PREFIX: &str = "bedrock.";

/// Models known to produce usable label tables
pub const SUPPORTED_MODELS: &[&str] = &[
    "gpt-4-0613",
    "gpt-4-1106-preview",
    "gpt-4-turbo-2024-04-09",
    "gpt-4o-2024-05-13",
    "gpt-4o-mini-2024-07-18",
    "bedrock.anthropic.claude-v2",
    "bedrock.anthropic.claude-3-sonnet-20240229-v1:0",
    "bedrock.anthropic.claude-3-opus-20240229-v1:0",
    "bedrock.anthropic.claude-3-5-sonnet-20240620-v1:0",
    "bedrock.meta.llama2-13b-chat-v1",
    "bedrock.meta.llama2-70b-chat-v1",
    "bedrock.meta.llama3-70b-instruct-v1:0",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Bedrock,
}

/// Request body shape expected by the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// OpenAI chat completions
    Gpt,
    /// Anthropic Messages API on Bedrock
    Claude,
    /// Anthropic text completions (Claude v2 and earlier)
    ClaudeText,
    /// Meta Llama prompt/generation
    Llama,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown model: {0}")]
pub struct UnsupportedModel(pub String);

/// Where a model identifier is sent and how its body is shaped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    pub provider: Provider,
    pub family: ModelFamily,
    /// Identifier as the provider knows it (routing prefix removed)
    pub model_id: String,
}

impl ModelRoute {
    /// Route a model identifier: `gpt*` goes to OpenAI, `bedrock.<id>` to Bedrock
    pub fn parse(identifier: &str) -> Result<Self, UnsupportedModel> {
        if identifier.starts_with("gpt") {
            return Ok(Self {
                provider: Provider::OpenAi,
                family: ModelFamily::Gpt,
                model_id: identifier.to_string(),
            });
        }

        let Some(model_id) = identifier.strip_prefix(BEDROCK_PREFIX) else {
            return Err(UnsupportedModel(identifier.to_string()));
        };

        let family = if model_id.starts_with("anthropic.claude-v")
            || model_id.starts_with("anthropic.claude-instant")
        {
            ModelFamily::ClaudeText
        } else if model_id.starts_with("anthropic.") {
            ModelFamily::Claude
        } else if model_id.starts_with("meta.") {
            ModelFamily::Llama
        } else {
            return Err(UnsupportedModel(identifier.to_string()));
        };

        Ok(Self {
            provider: Provider::Bedrock,
            family,
            model_id: model_id.to_string(),
        })
    }
}

/// A few-shot example: student code and the label table expected for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub code: String,
    pub response: String,
}

/// Everything a transport needs to render its provider-specific body
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub route: ModelRoute,
    pub prompt: String,
    pub rubric: String,
    pub examples: Vec<FewShotExample>,
    pub code: String,
    pub num_responses: u32,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Resolved OpenAI key; Bedrock uses the ambient AWS credentials
    pub api_key: Option<String>,
    pub submission_id: String,
}

/// Why the provider stopped generating
///
/// Vocabularies differ by provider:
/// - OpenAI chat: `stop`, `length`, `content_filter`, `tool_calls`, `function_call`
/// - Anthropic Messages: `end_turn`, `max_tokens`, `stop_sequence`, `tool_use`
/// - Anthropic text completions: `stop_sequence`, `max_tokens`
/// - Meta Llama: `stop`, `length`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    FunctionCall,
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    #[serde(untagged)]
    Other(String),
}

impl FinishReason {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            "tool_calls" => FinishReason::ToolCalls,
            "function_call" => FinishReason::FunctionCall,
            "end_turn" => FinishReason::EndTurn,
            "max_tokens" => FinishReason::MaxTokens,
            "stop_sequence" => FinishReason::StopSequence,
            "tool_use" => FinishReason::ToolUse,
            other => FinishReason::Other(other.to_string()),
        }
    }

    /// Output was cut off by the token limit
    pub fn is_truncation(&self) -> bool {
        matches!(self, FinishReason::Length | FinishReason::MaxTokens)
    }
}

/// One sampled completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionChoice {
    pub index: usize,
    pub text: Option<String>,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionResponse {
    pub choices: Vec<CompletionChoice>,
    pub usage: TokenUsage,
}
