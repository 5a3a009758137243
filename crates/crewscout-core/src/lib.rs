pub mod config;
pub mod crew;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use crew::{RoleSpec, TaskGraph, TaskSpec};
pub use error::{CrewError, Result};
pub use event::EventBus;
pub use types::*;
