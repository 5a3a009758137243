pub mod agent_loop;
pub mod crew;

pub use agent_loop::{AgentRuntime, TaskAnswer};
pub use crew::competitor::{competitor_crew, idea_inputs, STARTUP_IDEA};
pub use crew::{CrewExecutor, CrewOutput, TaskOutput};
