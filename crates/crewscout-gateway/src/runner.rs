use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crewscout_agent::idea_inputs;
use crewscout_core::error::CrewError;
use crewscout_core::types::SessionId;

use crate::shell::{RunTicket, ShellEvent};
use crate::state::AppState;

/// Drive one analysis in the background and record its outcome.
///
/// The run races the configured timeout and the ticket's cancellation token.
/// Losing the race drops the executor future, which aborts its HTTP calls.
pub fn spawn_run(
    state: Arc<AppState>,
    session_id: SessionId,
    idea: String,
    ticket: RunTicket,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let inputs = idea_inputs(&idea);
        let limit = Duration::from_secs(state.timeout_secs);

        let outcome = tokio::select! {
            result = tokio::time::timeout(limit, state.executor.run(&state.graph, &inputs)) => {
                match result {
                    Ok(Ok(report)) => ShellEvent::Complete(report),
                    Ok(Err(e)) => ShellEvent::Fail(e.to_string()),
                    Err(_) => ShellEvent::Fail(CrewError::Timeout(state.timeout_secs).to_string()),
                }
            }
            _ = ticket.cancel.cancelled() => ShellEvent::Fail(CrewError::Cancelled.to_string()),
        };

        match &outcome {
            ShellEvent::Complete(report) => {
                info!(session = %session_id, bytes = report.len(), "Analysis complete")
            }
            ShellEvent::Fail(message) => warn!(session = %session_id, %message, "Analysis failed"),
            ShellEvent::Submit => {}
        }

        state.sessions.finish(&session_id, ticket.generation, outcome);
    })
}
