//! Provider request bodies and response shapes

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::model::{
    CompletionChoice, CompletionRequest, CompletionResponse, FinishReason, ModelFamily, TokenUsage,
};
use crate::service::llm::TransportError;

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
const LLAMA_MAX_GEN_LEN: u32 = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Grading instructions followed by the rubric table
pub fn system_prompt(request: &CompletionRequest) -> String {
    format!("{}\n\nRubric:\n{}", request.prompt, request.rubric)
}

/// Few-shot turns followed by the student code, without the system prompt
pub fn conversation(request: &CompletionRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(request.examples.len() * 2 + 1);
    for example in &request.examples {
        messages.push(ChatMessage::new("user", &example.code));
        messages.push(ChatMessage::new("assistant", &example.response));
    }
    messages.push(ChatMessage::new("user", &request.code));
    messages
}

/// OpenAI chat completions body; all samples come back from one call
pub fn chat_body(request: &CompletionRequest) -> Value {
    let mut messages = vec![ChatMessage::new("system", system_prompt(request))];
    messages.extend(conversation(request));
    json!({
        "model": request.route.model_id,
        "temperature": request.temperature,
        "messages": messages,
        "n": request.num_responses,
    })
}

/// Body for one Bedrock `invoke_model` call
pub fn bedrock_body(request: &CompletionRequest) -> Value {
    match request.route.family {
        ModelFamily::Claude => json!({
            "anthropic_version": ANTHROPIC_VERSION,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": system_prompt(request),
            "messages": conversation(request),
        }),
        ModelFamily::ClaudeText => json!({
            "prompt": claude_text_prompt(request),
            "max_tokens_to_sample": request.max_tokens,
            "temperature": request.temperature,
        }),
        ModelFamily::Llama => json!({
            "prompt": llama_prompt(request),
            "max_gen_len": request.max_tokens.min(LLAMA_MAX_GEN_LEN),
            "temperature": request.temperature,
        }),
        ModelFamily::Gpt => chat_body(request),
    }
}

fn claude_text_prompt(request: &CompletionRequest) -> String {
    let mut prompt = format!("\n\nHuman: {}", system_prompt(request));
    for (i, message) in conversation(request).into_iter().enumerate() {
        match (message.role, i) {
            ("user", 0) => prompt.push_str(&format!("\n\n{}", message.content)),
            ("user", _) => prompt.push_str(&format!("\n\nHuman: {}", message.content)),
            _ => prompt.push_str(&format!("\n\nAssistant: {}", message.content)),
        }
    }
    prompt.push_str("\n\nAssistant:");
    prompt
}

/// Llama gets no few-shot turns; they crowd out its context window
fn llama_prompt(request: &CompletionRequest) -> String {
    format!(
        "[INST]{}[/INST]\n\nRubric:\n{}\n\nStudent Code:\n{}\n\nEvaluation (JSON):\n",
        request.prompt, request.rubric, request.code
    )
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: usize,
    pub message: Option<ChatReply>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatReply {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesCompletion {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Deserialize)]
pub struct TextCompletion {
    pub completion: Option<String>,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Generation {
    pub generation: Option<String>,
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub generation_token_count: u64,
}

/// Decoded provider reply, one shape per model family
#[derive(Debug)]
pub enum ProviderResponse {
    Chat(ChatCompletion),
    Messages(MessagesCompletion),
    TextCompletion(TextCompletion),
    Generation(Generation),
}

impl ProviderResponse {
    pub fn decode(family: ModelFamily, bytes: &[u8]) -> Result<Self, TransportError> {
        Ok(match family {
            ModelFamily::Gpt => ProviderResponse::Chat(serde_json::from_slice(bytes)?),
            ModelFamily::Claude => ProviderResponse::Messages(serde_json::from_slice(bytes)?),
            ModelFamily::ClaudeText => {
                ProviderResponse::TextCompletion(serde_json::from_slice(bytes)?)
            }
            ModelFamily::Llama => ProviderResponse::Generation(serde_json::from_slice(bytes)?),
        })
    }

    pub fn into_completion(self) -> CompletionResponse {
        let reason = |r: Option<String>| r.as_deref().map(FinishReason::from_wire);
        match self {
            ProviderResponse::Chat(chat) => CompletionResponse {
                choices: chat
                    .choices
                    .into_iter()
                    .map(|choice| CompletionChoice {
                        index: choice.index,
                        text: choice.message.and_then(|m| m.content),
                        finish_reason: reason(choice.finish_reason),
                    })
                    .collect(),
                usage: chat.usage.unwrap_or_default(),
            },
            ProviderResponse::Messages(messages) => {
                let text: String = messages
                    .content
                    .iter()
                    .filter(|block| block.kind == "text")
                    .filter_map(|block| block.text.as_deref())
                    .collect();
                let usage = messages
                    .usage
                    .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens))
                    .unwrap_or_default();
                single(Some(text).filter(|t| !t.is_empty()), reason(messages.stop_reason), usage)
            }
            ProviderResponse::TextCompletion(text) => single(
                text.completion,
                reason(text.stop_reason),
                TokenUsage::default(),
            ),
            ProviderResponse::Generation(generation) => single(
                generation.generation,
                reason(generation.stop_reason),
                TokenUsage::new(generation.prompt_token_count, generation.generation_token_count),
            ),
        }
    }
}

fn single(
    text: Option<String>,
    finish_reason: Option<FinishReason>,
    usage: TokenUsage,
) -> CompletionResponse {
    CompletionResponse {
        choices: vec![CompletionChoice {
            index: 0,
            text,
            finish_reason,
        }],
        usage,
    }
}
