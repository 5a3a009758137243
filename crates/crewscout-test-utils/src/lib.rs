//! Mocks and fixtures shared by the crewscout test suites.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};

use crewscout_core::config::{AppConfig, ModelConfig, SearchConfig};
use crewscout_core::crew::TaskGraph;
use crewscout_core::error::{CrewError, Result};
use crewscout_core::traits::{Executor, LlmClient, Tool};
use crewscout_core::types::*;

/// One scripted LLM response.
#[derive(Debug, Clone)]
pub enum MockTurn {
    /// A final text answer.
    Text(String),
    /// A single tool call.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Text that stops arriving before any finish reason.
    Truncated(String),
    /// Some text, then a stream error.
    StreamError { partial: String, message: String },
    /// The request itself fails.
    Fail(String),
    /// The request never completes.
    Hang,
}

/// What the mock saw on one `chat_stream` call.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<String>,
}

impl MockRequest {
    /// Concatenated text of every message, for substring assertions.
    pub fn all_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// LLM client that replays a script of turns in order.
#[derive(Default)]
pub struct MockLlmClient {
    turns: Mutex<VecDeque<MockTurn>>,
    requests: Mutex<Vec<MockRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.push(MockTurn::Text(text.into()))
    }

    pub fn with_tool_call(
        self,
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        self.push(MockTurn::ToolCall {
            id: id.into(),
            name: name.into(),
            input,
        })
    }

    pub fn with_truncated(self, text: impl Into<String>) -> Self {
        self.push(MockTurn::Truncated(text.into()))
    }

    pub fn with_stream_error(self, partial: impl Into<String>, message: impl Into<String>) -> Self {
        self.push(MockTurn::StreamError {
            partial: partial.into(),
            message: message.into(),
        })
    }

    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.push(MockTurn::Fail(message.into()))
    }

    pub fn with_hang(self) -> Self {
        self.push(MockTurn::Hang)
    }

    fn push(self, turn: MockTurn) -> Self {
        self.turns.lock().unwrap().push_back(turn);
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Turns not yet consumed.
    pub fn remaining(&self) -> usize {
        self.turns.lock().unwrap().len()
    }
}

impl LlmClient for MockLlmClient {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        self.requests.lock().unwrap().push(MockRequest {
            messages,
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        let turn = self.turns.lock().unwrap().pop_front();

        Box::pin(async move {
            let deltas: Vec<Result<StreamDelta>> = match turn {
                None => return Err(CrewError::LlmRequest("mock script exhausted".into())),
                Some(MockTurn::Fail(msg)) => return Err(CrewError::LlmRequest(msg)),
                Some(MockTurn::Hang) => {
                    futures::future::pending::<()>().await;
                    unreachable!("pending never resolves")
                }
                Some(MockTurn::Text(text)) => vec![
                    Ok(StreamDelta::TextDelta(text)),
                    Ok(StreamDelta::Usage {
                        input_tokens: 10,
                        output_tokens: 5,
                    }),
                    Ok(StreamDelta::Stop(StopReason::EndTurn)),
                ],
                Some(MockTurn::Truncated(text)) => vec![Ok(StreamDelta::TextDelta(text))],
                Some(MockTurn::StreamError { partial, message }) => vec![
                    Ok(StreamDelta::TextDelta(partial)),
                    Err(CrewError::LlmStream(message)),
                ],
                Some(MockTurn::ToolCall { id, name, input }) => vec![
                    Ok(StreamDelta::ToolUseStart { index: 0, id, name }),
                    Ok(StreamDelta::ToolInputDelta {
                        index: 0,
                        delta: input.to_string(),
                    }),
                    Ok(StreamDelta::Stop(StopReason::ToolUse)),
                ],
            };
            let stream = stream::iter(deltas);
            Ok(Box::pin(stream) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

/// Tool that returns a canned response and records every input.
pub struct RecordingTool {
    name: String,
    response: String,
    calls: Mutex<Vec<serde_json::Value>>,
}

impl RecordingTool {
    pub fn new(name: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response: response.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<serde_json::Value> {
        self.calls.lock().unwrap().clone()
    }
}

impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Recording test tool"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string" } }
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        self.calls.lock().unwrap().push(input);
        let response = self.response.clone();
        Box::pin(async move { Ok(ToolResult::success(response)) })
    }
}

#[derive(Debug, Clone)]
enum StubOutcome {
    Report(String),
    Failure(String),
}

/// Executor returning a canned report or error, optionally after a delay.
pub struct StubExecutor {
    outcome: StubOutcome,
    delay: Option<Duration>,
    inputs: Mutex<Vec<HashMap<String, String>>>,
}

impl StubExecutor {
    pub fn report(text: impl Into<String>) -> Self {
        Self::with_outcome(StubOutcome::Report(text.into()))
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_outcome(StubOutcome::Failure(message.into()))
    }

    fn with_outcome(outcome: StubOutcome) -> Self {
        Self {
            outcome,
            delay: None,
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Inputs of every run started so far.
    pub fn inputs(&self) -> Vec<HashMap<String, String>> {
        self.inputs.lock().unwrap().clone()
    }
}

impl Executor for StubExecutor {
    fn run<'a>(
        &'a self,
        _graph: &'a TaskGraph,
        inputs: &'a HashMap<String, String>,
    ) -> BoxFuture<'a, Result<String>> {
        self.inputs.lock().unwrap().push(inputs.clone());
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.outcome {
                StubOutcome::Report(text) => Ok(text.clone()),
                StubOutcome::Failure(msg) => Err(CrewError::LlmRequest(msg.clone())),
            }
        })
    }
}

/// Config with dummy credentials and a search endpoint nothing listens on.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::from_env();
    config.model.api_key = Some("gsk-test".into());
    config.search = SearchConfig {
        api_key: Some("google-test".into()),
        engine_id: Some("cx-test".into()),
        endpoint: "http://127.0.0.1:1/customsearch/v1".into(),
        ..SearchConfig::default()
    };
    config.gateway.token = None;
    config
}
