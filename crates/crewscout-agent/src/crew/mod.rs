//! Sequential crew execution over a [`TaskGraph`].

pub mod competitor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crewscout_core::config::{Aggregation, AppConfig};
use crewscout_core::crew::{RenderedTask, RoleSpec, TaskGraph};
use crewscout_core::error::{CrewError, Result};
use crewscout_core::event::EventBus;
use crewscout_core::traits::{Executor, LlmClient};
use crewscout_core::types::{AgentEvent, ChatMessage, RunId};
use crewscout_tools::ToolRegistry;

use crate::agent_loop::AgentRuntime;

/// Output of one executed task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput {
    pub task_id: String,
    /// Name of the role that produced the output.
    pub role: String,
    pub output: String,
    pub elapsed_ms: u64,
}

/// Per-task outputs of a whole run, in execution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrewOutput {
    pub tasks: Vec<TaskOutput>,
}

impl CrewOutput {
    /// Output of a task by id.
    pub fn get(&self, task_id: &str) -> Option<&TaskOutput> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    /// Merge the task outputs into one report.
    pub fn aggregate(&self, mode: Aggregation) -> String {
        match mode {
            Aggregation::Last => self
                .tasks
                .last()
                .map(|t| t.output.clone())
                .unwrap_or_default(),
            Aggregation::Concatenate => self
                .tasks
                .iter()
                .map(|t| format!("## {}\n\n{}", t.role, t.output.trim_end()))
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

/// System prompt for a role.
pub fn system_prompt(role: &RoleSpec) -> String {
    format!(
        "You are {}. {}\nYour personal goal is: {}",
        role.name, role.backstory, role.goal
    )
}

/// User brief for a rendered task plus the outputs of its dependencies.
pub fn task_brief(task: &RenderedTask, context: &[&TaskOutput]) -> String {
    let mut brief = format!(
        "Current Task: {}\n\nThis is the expected criteria for your final answer: {}\n\
         You MUST return the actual complete content as the final answer, not a summary.",
        task.description, task.expected_output
    );

    if !context.is_empty() {
        brief.push_str("\n\nThis is the context you're working with:");
        for dep in context {
            brief.push_str(&format!("\n\n### {} ({})\n{}", dep.role, dep.task_id, dep.output));
        }
    }
    brief
}

/// Runs every task of a graph one after another through an [`AgentRuntime`].
pub struct CrewExecutor {
    runtime: AgentRuntime,
    event_bus: Arc<EventBus>,
    aggregation: Aggregation,
}

impl CrewExecutor {
    pub fn new(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let runtime = AgentRuntime::new(
            config.model.clone(),
            llm,
            tools,
            event_bus.clone(),
            config.crew.max_turns,
        );
        Self {
            runtime,
            event_bus,
            aggregation: config.crew.aggregation,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.runtime = self.runtime.with_cancel(cancel);
        self
    }

    /// Execute the graph and keep every task's output.
    pub async fn kickoff(
        &self,
        graph: &TaskGraph,
        inputs: &HashMap<String, String>,
    ) -> Result<CrewOutput> {
        let run_id = RunId::new();
        let total_tasks = graph.tasks().len();

        self.event_bus.publish(AgentEvent::RunStarted {
            run_id: run_id.clone(),
            total_tasks,
        });
        info!(%run_id, total_tasks, "Crew run started");

        match self.execute(&run_id, graph, inputs).await {
            Ok((output, input_tokens, output_tokens)) => {
                info!(%run_id, input_tokens, output_tokens, "Crew run complete");
                self.event_bus.publish(AgentEvent::RunComplete {
                    run_id,
                    total_tasks,
                    input_tokens,
                    output_tokens,
                });
                Ok(output)
            }
            Err(e) => {
                error!(%run_id, error = %e, "Crew run failed");
                self.event_bus.publish(AgentEvent::RunError {
                    run_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        run_id: &RunId,
        graph: &TaskGraph,
        inputs: &HashMap<String, String>,
    ) -> Result<(CrewOutput, u64, u64)> {
        // Render everything first so a missing input fails before any LLM call.
        let rendered: HashMap<&str, RenderedTask> = graph
            .tasks()
            .iter()
            .map(|t| t.render(inputs).map(|r| (t.id.as_str(), r)))
            .collect::<Result<_>>()?;

        let mut output = CrewOutput::default();
        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;

        for task in graph.execution_order() {
            let role = graph.role_for(task).ok_or_else(|| {
                CrewError::InvalidGraph(format!("task {} has no role {}", task.id, task.role))
            })?;
            let brief = rendered.get(task.id.as_str()).ok_or_else(|| {
                CrewError::InvalidGraph(format!("task {} was not rendered", task.id))
            })?;

            // Dependencies always precede the task in execution order.
            let context: Vec<&TaskOutput> = graph
                .dependencies(task)
                .iter()
                .filter_map(|dep| output.get(&dep.id))
                .collect();

            self.event_bus.publish(AgentEvent::TaskStarted {
                run_id: run_id.clone(),
                task_id: task.id.clone(),
                role: role.name.clone(),
            });
            info!(task_id = %task.id, role = %role.name, "Task started");

            let messages = vec![
                ChatMessage::system(system_prompt(role)),
                ChatMessage::user(task_brief(brief, &context)),
            ];

            let start = Instant::now();
            let answer = self.runtime.run_task(run_id, &task.id, role, messages).await?;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            input_tokens += answer.input_tokens;
            output_tokens += answer.output_tokens;

            self.event_bus.publish(AgentEvent::TaskComplete {
                run_id: run_id.clone(),
                task_id: task.id.clone(),
                elapsed_ms,
            });

            output.tasks.push(TaskOutput {
                task_id: task.id.clone(),
                role: role.name.clone(),
                output: answer.text,
                elapsed_ms,
            });
        }

        Ok((output, input_tokens, output_tokens))
    }
}

impl Executor for CrewExecutor {
    fn run<'a>(
        &'a self,
        graph: &'a TaskGraph,
        inputs: &'a HashMap<String, String>,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let output = self.kickoff(graph, inputs).await?;
            Ok(output.aggregate(self.aggregation))
        })
    }
}
