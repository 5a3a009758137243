pub mod builtin;
pub mod registry;

pub use builtin::google_search::{GoogleSearchTool, SearchHit, SearchQuery};
pub use registry::ToolRegistry;
