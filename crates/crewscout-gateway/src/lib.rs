mod auth;
mod middleware;
mod routes;
mod runner;
mod server;
mod shell;
mod state;
mod static_files;

pub use server::{router, GatewayServer};
pub use shell::{ShellError, ShellEvent, ShellSessions, ShellState};
pub use state::AppState;
