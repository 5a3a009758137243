use std::sync::Arc;

use crewscout_core::config::GatewayConfig;
use crewscout_core::crew::TaskGraph;
use crewscout_core::traits::Executor;

use crate::shell::ShellSessions;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub executor: Arc<dyn Executor>,
    pub graph: Arc<TaskGraph>,
    pub sessions: ShellSessions,
    /// Wall-clock bound for one run.
    pub timeout_secs: u64,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        executor: Arc<dyn Executor>,
        graph: TaskGraph,
        timeout_secs: u64,
    ) -> Self {
        let sessions = ShellSessions::with_ttl(config.session_ttl_secs);
        Self {
            config,
            executor,
            graph: Arc::new(graph),
            sessions,
            timeout_secs,
        }
    }
}
