use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crewscout_core::config::ModelConfig;
use crewscout_core::crew::RoleSpec;
use crewscout_core::error::{CrewError, Result};
use crewscout_core::event::EventBus;
use crewscout_core::traits::LlmClient;
use crewscout_core::types::*;
use crewscout_tools::ToolRegistry;

/// Accumulator for streaming tool call deltas.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    input_json: String,
}

/// Final answer of one task plus the tokens it consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskAnswer {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// The agent runtime: runs one task as a ReAct loop with streaming.
pub struct AgentRuntime {
    model: ModelConfig,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    event_bus: Arc<EventBus>,
    cancel: CancellationToken,
    max_turns: usize,
}

impl AgentRuntime {
    pub fn new(
        model: ModelConfig,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
        max_turns: usize,
    ) -> Self {
        Self {
            model,
            llm,
            tools,
            event_bus,
            cancel: CancellationToken::new(),
            max_turns,
        }
    }

    /// Abort the loop when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Get a cancellation token for this runtime.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute a tool call on behalf of `role`. Never fails: errors become
    /// error results the model can read.
    async fn execute_tool(
        &self,
        role: &RoleSpec,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> ToolResult {
        if !role.tools.iter().any(|t| t == name) {
            warn!(tool = %name, role = %role.name, "Tool call outside the role's toolset");
            return ToolResult::error(format!(
                "Tool '{name}' is not available to {}",
                role.name
            ));
        }

        match self.tools.execute(name, input, ctx).await {
            Ok(r) => r,
            Err(e) => {
                error!(tool = %name, error = %e, "Tool execution failed");
                ToolResult::error(e.to_string())
            }
        }
    }

    /// Run the loop for one task until the model gives a text-only answer.
    ///
    /// `messages` is the opening conversation (system prompt and task brief).
    pub async fn run_task(
        &self,
        run_id: &RunId,
        task_id: &str,
        role: &RoleSpec,
        mut messages: Vec<ChatMessage>,
    ) -> Result<TaskAnswer> {
        let tool_defs = self.tools.definitions_for(&role.tools);
        let tool_ctx = ToolContext {
            run_id: run_id.clone(),
            task_id: task_id.to_string(),
        };

        let mut total_input_tokens = 0u64;
        let mut total_output_tokens = 0u64;

        for turn in 0..self.max_turns {
            if self.cancel.is_cancelled() {
                return Err(CrewError::Cancelled);
            }

            debug!(task_id, turn, "Starting agent turn");

            let stream_result = tokio::select! {
                result = self.llm.chat_stream(&self.model, messages.clone(), &tool_defs) => result,
                _ = self.cancel.cancelled() => return Err(CrewError::Cancelled),
            };
            let mut stream = stream_result?;

            let mut text_content = String::new();
            let mut tool_calls: Vec<ToolCallAccumulator> = Vec::new();
            let mut stop_reason = None;

            loop {
                let delta = tokio::select! {
                    delta = stream.next() => delta,
                    _ = self.cancel.cancelled() => return Err(CrewError::Cancelled),
                };
                let Some(delta) = delta else { break };

                match delta? {
                    StreamDelta::TextDelta(text) => text_content.push_str(&text),
                    StreamDelta::ToolUseStart { index, id, name } => {
                        while tool_calls.len() <= index {
                            tool_calls.push(ToolCallAccumulator::default());
                        }
                        tool_calls[index].id = id;
                        tool_calls[index].name = name;
                    }
                    StreamDelta::ToolInputDelta { index, delta } => {
                        if let Some(tc) = tool_calls.get_mut(index) {
                            tc.input_json.push_str(&delta);
                        }
                    }
                    StreamDelta::Stop(reason) => stop_reason = Some(reason),
                    StreamDelta::Usage {
                        input_tokens,
                        output_tokens,
                    } => {
                        total_input_tokens += input_tokens;
                        total_output_tokens += output_tokens;
                    }
                }
            }
            drop(stream);

            // A response cut off before its finish reason is truncated, not final.
            let Some(stop_reason) = stop_reason else {
                warn!(task_id, turn, "LLM stream ended without a finish reason");
                return Err(CrewError::LlmStream(
                    "response ended before the model finished".to_string(),
                ));
            };

            // Accumulators for indexes the provider skipped carry no name.
            tool_calls.retain(|tc| !tc.name.is_empty());

            if tool_calls.is_empty() {
                if stop_reason == StopReason::MaxTokens {
                    warn!(task_id, "LLM hit max tokens");
                }
                if text_content.trim().is_empty() {
                    return Err(CrewError::EmptyOutput(task_id.to_string()));
                }
                info!(
                    task_id,
                    turns = turn + 1,
                    input_tokens = total_input_tokens,
                    output_tokens = total_output_tokens,
                    "Task answered"
                );
                return Ok(TaskAnswer {
                    text: text_content,
                    input_tokens: total_input_tokens,
                    output_tokens: total_output_tokens,
                });
            }

            let parsed_inputs: Vec<serde_json::Value> = tool_calls
                .iter()
                .map(|tc| serde_json::from_str(&tc.input_json).unwrap_or(serde_json::Value::Null))
                .collect();

            let mut content_blocks = Vec::new();
            if !text_content.is_empty() {
                content_blocks.push(ContentBlock::Text { text: text_content });
            }
            for (tc, input) in tool_calls.iter().zip(parsed_inputs.iter()) {
                content_blocks.push(ContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    input: input.clone(),
                });
            }
            messages.push(ChatMessage {
                role: Role::Assistant,
                content: content_blocks,
                timestamp: Some(chrono::Utc::now()),
            });

            let mut tool_result_blocks = Vec::with_capacity(tool_calls.len());
            for (tc, input) in tool_calls.iter().zip(parsed_inputs.into_iter()) {
                self.event_bus.publish(AgentEvent::ToolStart {
                    task_id: task_id.to_string(),
                    name: tc.name.clone(),
                    input: input.clone(),
                });

                let result = tokio::select! {
                    r = self.execute_tool(role, &tc.name, input, tool_ctx.clone()) => r,
                    _ = self.cancel.cancelled() => return Err(CrewError::Cancelled),
                };

                self.event_bus.publish(AgentEvent::ToolEnd {
                    task_id: task_id.to_string(),
                    name: tc.name.clone(),
                    result: result.clone(),
                });

                tool_result_blocks.push(ContentBlock::ToolResult {
                    tool_use_id: tc.id.clone(),
                    content: result.content,
                    is_error: result.is_error,
                });
            }

            messages.push(ChatMessage {
                role: Role::User,
                content: tool_result_blocks,
                timestamp: Some(chrono::Utc::now()),
            });
        }

        Err(CrewError::MaxTurnsExceeded {
            task: task_id.to_string(),
            max_turns: self.max_turns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewscout_test_utils::{MockLlmClient, RecordingTool};
    use serde_json::json;

    fn researcher() -> RoleSpec {
        RoleSpec::new("Market Researcher", "Find competitors", "Expert")
            .with_tools(vec!["google_search".into()])
    }

    fn runtime(llm: Arc<MockLlmClient>, tools: ToolRegistry, max_turns: usize) -> AgentRuntime {
        AgentRuntime::new(
            ModelConfig::default(),
            llm,
            Arc::new(tools),
            Arc::new(EventBus::default()),
            max_turns,
        )
    }

    fn opening() -> Vec<ChatMessage> {
        vec![ChatMessage::system("sys"), ChatMessage::user("find competitors")]
    }

    #[tokio::test]
    async fn test_text_answer_ends_task() {
        let llm = Arc::new(MockLlmClient::new().with_text("Otter: https://otter.ai"));
        let rt = runtime(llm.clone(), ToolRegistry::new(), 5);

        let answer = rt
            .run_task(&RunId::new(), "research", &researcher(), opening())
            .await
            .unwrap();
        assert_eq!(answer.text, "Otter: https://otter.ai");
        assert_eq!(answer.input_tokens, 10);
        assert_eq!(llm.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_tool_result_is_fed_back() {
        let search = Arc::new(RecordingTool::new("google_search", "Otter: https://otter.ai"));
        let mut tools = ToolRegistry::new();
        tools.register_arc(search.clone());

        let llm = Arc::new(
            MockLlmClient::new()
                .with_tool_call("call_1", "google_search", json!({"query": "note apps"}))
                .with_text("Found Otter"),
        );
        let rt = runtime(llm.clone(), tools, 5);

        let answer = rt
            .run_task(&RunId::new(), "research", &researcher(), opening())
            .await
            .unwrap();
        assert_eq!(answer.text, "Found Otter");
        assert_eq!(search.calls(), vec![json!({"query": "note apps"})]);

        let requests = llm.requests();
        assert_eq!(requests[0].tools, vec!["google_search"]);
        let last = requests[1].messages.last().unwrap();
        match &last.content[0] {
            ContentBlock::ToolResult { tool_use_id, content, is_error } => {
                assert_eq!(tool_use_id, "call_1");
                assert_eq!(content, "Otter: https://otter.ai");
                assert!(!is_error);
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unheld_tool_gets_error_result() {
        let search = Arc::new(RecordingTool::new("google_search", "unused"));
        let mut tools = ToolRegistry::new();
        tools.register_arc(search.clone());

        let analyst = RoleSpec::new("Feature Analyst", "Compare", "PM");
        let llm = Arc::new(
            MockLlmClient::new()
                .with_tool_call("c1", "google_search", json!({"query": "x"}))
                .with_text("table"),
        );
        let rt = runtime(llm.clone(), tools, 5);

        rt.run_task(&RunId::new(), "comparison", &analyst, opening())
            .await
            .unwrap();
        assert!(search.calls().is_empty());
        assert!(llm.requests()[0].tools.is_empty());

        let last = llm.requests()[1].messages.last().unwrap().clone();
        assert!(matches!(
            &last.content[0],
            ContentBlock::ToolResult { is_error: true, content, .. } if content.contains("not available")
        ));
    }

    #[tokio::test]
    async fn test_llm_error_propagates() {
        let llm = Arc::new(MockLlmClient::new().with_failure("HTTP 401: invalid key"));
        let rt = runtime(llm, ToolRegistry::new(), 5);
        let err = rt
            .run_task(&RunId::new(), "research", &researcher(), opening())
            .await
            .unwrap_err();
        assert!(matches!(err, CrewError::LlmRequest(msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn test_max_turns_exceeded() {
        let mut tools = ToolRegistry::new();
        tools.register(RecordingTool::new("google_search", "more"));
        let llm = Arc::new(
            MockLlmClient::new()
                .with_tool_call("c1", "google_search", json!({"query": "a"}))
                .with_tool_call("c2", "google_search", json!({"query": "b"})),
        );
        let rt = runtime(llm, tools, 2);
        let err = rt
            .run_task(&RunId::new(), "research", &researcher(), opening())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CrewError::MaxTurnsExceeded { ref task, max_turns: 2 } if task == "research"
        ));
    }

    #[tokio::test]
    async fn test_stream_error_discards_partial_text() {
        let llm = Arc::new(
            MockLlmClient::new().with_stream_error("Partial answer", "Rate limit reached"),
        );
        let rt = runtime(llm, ToolRegistry::new(), 5);
        let err = rt
            .run_task(&RunId::new(), "research", &researcher(), opening())
            .await
            .unwrap_err();
        assert!(matches!(err, CrewError::LlmStream(msg) if msg == "Rate limit reached"));
    }

    #[tokio::test]
    async fn test_missing_finish_reason_is_stream_error() {
        let llm = Arc::new(MockLlmClient::new().with_truncated("Otter: https://ott"));
        let rt = runtime(llm, ToolRegistry::new(), 5);
        let err = rt
            .run_task(&RunId::new(), "research", &researcher(), opening())
            .await
            .unwrap_err();
        assert!(matches!(err, CrewError::LlmStream(_)));
    }

    #[tokio::test]
    async fn test_blank_answer_is_empty_output() {
        let llm = Arc::new(MockLlmClient::new().with_text("   \n"));
        let rt = runtime(llm, ToolRegistry::new(), 5);
        let err = rt
            .run_task(&RunId::new(), "gtm", &researcher(), opening())
            .await
            .unwrap_err();
        assert!(matches!(err, CrewError::EmptyOutput(id) if id == "gtm"));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_request() {
        let llm = Arc::new(MockLlmClient::new().with_hang());
        let rt = runtime(llm, ToolRegistry::new(), 5);
        let token = rt.cancel_token();

        let run_id = RunId::new();
        let role = researcher();
        let run = rt.run_task(&run_id, "research", &role, opening());
        tokio::pin!(run);

        tokio::select! {
            _ = &mut run => panic!("hung request must not finish"),
            _ = tokio::task::yield_now() => {}
        }
        token.cancel();
        assert!(matches!(run.await, Err(CrewError::Cancelled)));
    }
}
