use std::collections::HashMap;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::crew::TaskGraph;
use crate::error::Result;
use crate::types::*;

/// LLM client — streaming chat completions.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Tool — callable by an agent during a task.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in LLM tool calls).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Crew executor — resolves a task graph into a single report.
///
/// Implementations run every task in an order consistent with the graph and
/// return one string. Any failure aborts the run; nothing partial is returned.
pub trait Executor: Send + Sync + 'static {
    fn run<'a>(
        &'a self,
        graph: &'a TaskGraph,
        inputs: &'a HashMap<String, String>,
    ) -> BoxFuture<'a, Result<String>>;
}
