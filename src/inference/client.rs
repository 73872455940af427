//! OpenAI-compatible chat completion client.
//!
//! Works against any backend exposing `POST /v1/chat/completions` (OpenAI,
//! Ollama, llama.cpp, vLLM). Conversation turns are mapped onto the chat
//! message format, with consecutive tool calls folded into one assistant
//! message the way the round-trip convention expects.

use async_trait::async_trait;

use crate::agent_core::types::Turn;
use crate::mcp_client::registry::QualifiedTool;

use super::errors::InferenceError;
use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, FunctionCall, ModelResponse,
    Role, ToolCallMessage, ToolCallRequest,
};
use super::ModelClient;

const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Client for an OpenAI-compatible chat completion endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(base_url: &str, model: &str) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| InferenceError::Http {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            model: model.to_string(),
            system_prompt: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = Some(prompt.to_string());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(
        &self,
        turns: &[Turn],
        tools: &[QualifiedTool],
    ) -> Result<ModelResponse, InferenceError> {
        let mut messages = Vec::new();
        if let Some(prompt) = &self.system_prompt {
            messages.push(ChatMessage {
                role: Role::System,
                content: Some(prompt.clone()),
                tool_call_id: None,
                tool_calls: None,
            });
        }
        messages.extend(build_messages(turns));

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(|t| t.to_function_schema()).collect())
            },
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut builder = self.http.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Api {
                status: status.as_u16(),
                message: body.chars().take(500).collect(),
            });
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            InferenceError::MalformedResponse {
                reason: e.to_string(),
            }
        })?;
        parse_response(completion)
    }
}

/// Map conversation turns onto chat messages. Consecutive tool-call turns
/// fold into a single assistant message carrying all of them, and each
/// tool result becomes a `tool` role message tied back by call id.
fn build_messages(turns: &[Turn]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut pending_calls: Vec<ToolCallMessage> = Vec::new();

    for turn in turns {
        if let Turn::ToolCall {
            id,
            name,
            arguments,
        } = turn
        {
            pending_calls.push(ToolCallMessage {
                id: id.clone(),
                r#type: "function".to_string(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: arguments.to_string(),
                },
            });
            continue;
        }
        if !pending_calls.is_empty() {
            messages.push(ChatMessage {
                role: Role::Assistant,
                content: None,
                tool_call_id: None,
                tool_calls: Some(std::mem::take(&mut pending_calls)),
            });
        }
        match turn {
            Turn::User { content } => messages.push(ChatMessage {
                role: Role::User,
                content: Some(content.clone()),
                tool_call_id: None,
                tool_calls: None,
            }),
            Turn::Assistant { content } => messages.push(ChatMessage {
                role: Role::Assistant,
                content: Some(content.clone()),
                tool_call_id: None,
                tool_calls: None,
            }),
            Turn::ToolResult {
                call_id,
                content,
                is_error,
            } => messages.push(ChatMessage {
                role: Role::Tool,
                content: Some(if *is_error {
                    format!("Error: {content}")
                } else {
                    content.clone()
                }),
                tool_call_id: Some(call_id.clone()),
                tool_calls: None,
            }),
            Turn::ToolCall { .. } => {}
        }
    }
    if !pending_calls.is_empty() {
        messages.push(ChatMessage {
            role: Role::Assistant,
            content: None,
            tool_call_id: None,
            tool_calls: Some(pending_calls),
        });
    }
    messages
}

/// Interpret a completion: tool calls win over content when both appear.
fn parse_response(completion: ChatCompletionResponse) -> Result<ModelResponse, InferenceError> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| InferenceError::MalformedResponse {
            reason: "response carried no choices".to_string(),
        })?;

    if let Some(tool_calls) = choice.message.tool_calls {
        if !tool_calls.is_empty() {
            let mut requests = Vec::with_capacity(tool_calls.len());
            for call in tool_calls {
                let arguments = serde_json::from_str(&call.function.arguments).map_err(|e| {
                    InferenceError::MalformedResponse {
                        reason: format!(
                            "tool call '{}' has invalid arguments: {e}",
                            call.function.name
                        ),
                    }
                })?;
                let id = if call.id.is_empty() {
                    ToolCallRequest::new(&call.function.name, serde_json::Value::Null).id
                } else {
                    call.id
                };
                requests.push(ToolCallRequest {
                    id,
                    name: call.function.name,
                    arguments,
                });
            }
            return Ok(ModelResponse::ToolCalls(requests));
        }
    }

    Ok(ModelResponse::Answer(
        choice.message.content.unwrap_or_default(),
    ))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
