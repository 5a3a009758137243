use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crewscout_core::config::ModelConfig;
use crewscout_core::error::{CrewError, Result};
use crewscout_core::traits::LlmClient;
use crewscout_core::types::*;

use crate::streaming::{SseEvent, SseStream};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Groq, Ollama, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
}

impl OpenAiClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
}

#[derive(Serialize, Debug)]
pub(crate) struct OaiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OaiMessage {
    fn text(role: &str, text: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(serde_json::Value::String(text)),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct OaiToolCall {
    #[serde(default)]
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    r#type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<OaiFunction>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct OaiFunction {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct OaiTool {
    r#type: String,
    function: OaiToolDef,
}

#[derive(Serialize)]
pub(crate) struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
    #[serde(default)]
    error: Option<StreamErrorBody>,
}

// Providers report mid-response failures in-band as `{"error":{...}}`.
#[derive(Deserialize, Debug)]
struct StreamErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    r#type: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDeltaContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDeltaContent {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
}

#[derive(Deserialize, Debug)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub(crate) fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function".to_string(),
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

pub(crate) fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    let mut oai_msgs = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => oai_msgs.push(OaiMessage::text("system", msg.text())),
            Role::User => {
                // Tool results travel as user messages internally, as `tool` on the wire
                let tool_results: Vec<_> = msg
                    .content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => Some((tool_use_id.clone(), content.clone())),
                        _ => None,
                    })
                    .collect();

                if tool_results.is_empty() {
                    oai_msgs.push(OaiMessage::text("user", msg.text()));
                } else {
                    for (id, content) in tool_results {
                        oai_msgs.push(OaiMessage {
                            tool_call_id: Some(id),
                            ..OaiMessage::text("tool", content)
                        });
                    }
                }
            }
            Role::Assistant => {
                let tool_uses = msg.tool_uses();
                if tool_uses.is_empty() {
                    oai_msgs.push(OaiMessage::text("assistant", msg.text()));
                    continue;
                }

                let text = msg.text();
                let calls: Vec<OaiToolCall> = tool_uses
                    .iter()
                    .enumerate()
                    .map(|(i, (id, name, input))| OaiToolCall {
                        index: i,
                        id: Some(id.to_string()),
                        r#type: Some("function".to_string()),
                        function: Some(OaiFunction {
                            name: Some(name.to_string()),
                            arguments: Some(input.to_string()),
                        }),
                    })
                    .collect();

                oai_msgs.push(OaiMessage {
                    role: "assistant".to_string(),
                    content: if text.is_empty() {
                        None
                    } else {
                        Some(serde_json::Value::String(text))
                    },
                    tool_calls: Some(calls),
                    tool_call_id: None,
                });
            }
        }
    }

    oai_msgs
}

pub(crate) fn parse_chunk(event: SseEvent) -> Vec<Result<StreamDelta>> {
    if event.data.trim() == "[DONE]" {
        return vec![];
    }

    let chunk: StreamChunk = match serde_json::from_str(&event.data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(data = %event.data, error = %e, "Failed to parse SSE chunk");
            return vec![Err(CrewError::LlmParse(format!("{e}: {}", event.data)))];
        }
    };

    if let Some(err) = chunk.error {
        let message = err
            .message
            .or(err.r#type)
            .unwrap_or_else(|| event.data.clone());
        warn!(%message, "Provider reported an error mid-stream");
        return vec![Err(CrewError::LlmStream(message))];
    }

    let mut deltas = Vec::new();

    if let Some(usage) = chunk.usage {
        deltas.push(Ok(StreamDelta::Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }));
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return deltas;
    };

    if let Some(delta) = choice.delta {
        if let Some(text) = delta.content {
            if !text.is_empty() {
                deltas.push(Ok(StreamDelta::TextDelta(text)));
            }
        }

        // Groq and others send name + arguments in the same chunk, so both
        // deltas may come out of one tool call entry.
        for tc in delta.tool_calls.unwrap_or_default() {
            if let Some(func) = tc.function {
                if let Some(name) = func.name {
                    deltas.push(Ok(StreamDelta::ToolUseStart {
                        index: tc.index,
                        id: tc.id.unwrap_or_default(),
                        name,
                    }));
                }
                if let Some(args) = func.arguments {
                    if !args.is_empty() {
                        deltas.push(Ok(StreamDelta::ToolInputDelta {
                            index: tc.index,
                            delta: args,
                        }));
                    }
                }
            }
        }
    }

    if let Some(reason) = choice.finish_reason {
        let stop = match reason.as_str() {
            "tool_calls" => StopReason::ToolUse,
            "length" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        };
        deltas.push(Ok(StreamDelta::Stop(stop)));
    }

    deltas
}

impl LlmClient for OpenAiClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let base_url = config.base_url.as_deref().unwrap_or(OPENAI_API_URL);

            let body = ChatRequest {
                model: config.model_id.clone(),
                messages: convert_messages(messages),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                stream: true,
                tools: convert_tools(&tools),
            };

            debug!(model = %config.model_id, url = %base_url, tools = tools.len(), "Sending chat request");

            let mut req = self.http.post(base_url).json(&body);

            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            for (k, v) in &config.extra_headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let response = req
                .send()
                .await
                .map_err(|e| CrewError::LlmRequest(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(CrewError::LlmRequest(format!("HTTP {}: {}", status, body)));
            }

            let sse_stream = SseStream::new(response.bytes_stream());

            let delta_stream = sse_stream
                .map(|event| {
                    let deltas = match event {
                        Ok(event) => parse_chunk(event),
                        Err(e) => vec![Err(e)],
                    };
                    futures::stream::iter(deltas)
                })
                .flatten();

            Ok(Box::pin(delta_stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}
