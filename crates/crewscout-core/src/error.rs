use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrewError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Crew graph errors
    #[error("Invalid task graph: {0}")]
    InvalidGraph(String),

    #[error("Missing required input '{name}' for task {task}")]
    MissingInput { task: String, name: String },

    // Run errors
    #[error("Task {task} exceeded max turns ({max_turns})")]
    MaxTurnsExceeded { task: String, max_turns: usize },

    #[error("Task {0} produced an empty answer")]
    EmptyOutput(String),

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("Analysis timed out after {0}s")]
    Timeout(u64),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CrewError>;
