use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tradebot_core::config::LlmConfig;
use tradebot_core::conversation::{Message, ToolCallRequest};
use tradebot_core::tools::ToolSpec;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model returned an unusable response: {0}")]
    Protocol(String),
}

/// One completion from the chat model: either plain text or a request to
/// invoke tools.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), tool_calls: Vec::new() }
    }

    pub fn with_calls(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self { content: content.into(), tool_calls }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelReply, ModelError>;
}

/// Test double: hands out queued replies in order, then a canned fallback.
#[derive(Default)]
pub struct ScriptedChatModel {
    replies: Mutex<VecDeque<ModelReply>>,
}

impl ScriptedChatModel {
    pub fn with_replies(replies: Vec<ModelReply>) -> Self {
        Self { replies: Mutex::new(replies.into()) }
    }

    pub fn push_reply(&self, reply: ModelReply) {
        match self.replies.lock() {
            Ok(mut replies) => replies.push_back(reply),
            Err(poisoned) => poisoned.into_inner().push_back(reply),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn complete(
        &self,
        _messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<ModelReply, ModelError> {
        let reply = match self.replies.lock() {
            Ok(mut replies) => replies.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        Ok(reply.unwrap_or_else(|| ModelReply::text("I can help with stock prices and buys.")))
    }
}

/// Chat-completions client for OpenAI-compatible endpoints (OpenAI itself or
/// a local Ollama server).
pub struct OpenAiChatModel {
    client: reqwest::Client,
    completions_url: String,
    model: String,
    api_key: Option<SecretString>,
    max_retries: u32,
}

impl OpenAiChatModel {
    pub fn from_config(config: &LlmConfig) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let base = config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            completions_url: format!("{base}/chat/completions"),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
        })
    }

    async fn try_complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelReply, ModelError> {
        let mut body = json!({
            "model": self.model,
            "messages": wire_messages(messages),
            "temperature": 0,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(wire_tool).collect());
        }

        let mut request = self.client.post(&self.completions_url).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let completion: ChatCompletion =
            request.send().await?.error_for_status()?.json().await?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::Protocol("response carried no choices".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let arguments = serde_json::from_str(&call.function.arguments).map_err(|err| {
                    ModelError::Protocol(format!(
                        "tool call `{}` carried unparsable arguments: {err}",
                        call.function.name
                    ))
                })?;
                Ok(ToolCallRequest {
                    call_id: call.id,
                    tool_name: call.function.name,
                    arguments,
                })
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        Ok(ModelReply {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelReply, ModelError> {
        let mut attempt = 0;
        loop {
            match self.try_complete(messages, tools).await {
                Ok(reply) => return Ok(reply),
                Err(ModelError::Transport(err)) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        event_name = "llm.retry",
                        attempt,
                        error = %err,
                        "retrying chat completion after transport failure"
                    );
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let mut wire = json!({
                "role": message.role.as_str(),
                "content": message.content,
            });
            if message.has_tool_calls() {
                wire["tool_calls"] = Value::Array(
                    message
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.call_id,
                                "type": "function",
                                "function": {
                                    "name": call.tool_name,
                                    "arguments": call.arguments.to_string(),
                                },
                            })
                        })
                        .collect(),
                );
            }
            if let Some(tool_call_id) = &message.tool_call_id {
                wire["tool_call_id"] = Value::String(tool_call_id.clone());
            }
            wire
        })
        .collect()
}

fn wire_tool(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.parameters,
        },
    })
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}
