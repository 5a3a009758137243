//! Google Custom Search adapter.
//!
//! The adapter never fails: every error is folded into a string starting with
//! [`ERROR_PREFIX`], because its only consumer is an LLM reading plain text.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crewscout_core::config::SearchConfig;
use crewscout_core::error::{CrewError, Result};
use crewscout_core::traits::Tool;
use crewscout_core::types::{ToolContext, ToolResult};

pub const TOOL_NAME: &str = "google_search";
pub const DEFAULT_RESULT_COUNT: u32 = 5;
pub const NO_RESULTS: &str = "No results found";
pub const ERROR_PREFIX: &str = "Error performing search: ";

// Stays under the registry's 30s tool timeout so failures keep the prefix.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error)]
enum SearchError {
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("result count must be at least 1")]
    ZeroCount,
    #[error("{0} is not configured")]
    MissingCredential(&'static str),
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed response: {0}")]
    Body(String),
}

/// One search invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    text: String,
    result_count: u32,
}

impl SearchQuery {
    fn new(text: &str, result_count: u32) -> std::result::Result<Self, SearchError> {
        if text.trim().is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        if result_count == 0 {
            return Err(SearchError::ZeroCount);
        }
        Ok(Self {
            text: text.to_string(),
            result_count,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn result_count(&self) -> u32 {
        self.result_count
    }
}

/// A single ranked result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// Format hits as `"<title>: <link>"` lines in provider order.
pub fn render_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return NO_RESULTS.to_string();
    }
    hits.iter()
        .map(|h| format!("{}: {}", h.title, h.link))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct GoogleSearchTool {
    api_key: Option<String>,
    engine_id: Option<String>,
    endpoint: String,
    default_results: u32,
    http: Client,
}

impl GoogleSearchTool {
    pub fn new(config: &SearchConfig) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            api_key: config.api_key.clone(),
            engine_id: config.engine_id.clone(),
            endpoint: config.endpoint.clone(),
            default_results: config.default_results,
            http,
        }
    }

    /// Search and render the results as text. Never fails.
    pub async fn search(&self, query: &str, count: u32) -> String {
        let result = match SearchQuery::new(query, count) {
            Ok(q) => self.fetch(&q).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(hits) => {
                debug!(query, hits = hits.len(), "Search complete");
                render_hits(&hits)
            }
            Err(e) => {
                warn!(query, error = %e, "Search failed");
                format!("{ERROR_PREFIX}{e}")
            }
        }
    }

    async fn fetch(&self, query: &SearchQuery) -> std::result::Result<Vec<SearchHit>, SearchError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(SearchError::MissingCredential("GOOGLE_API_KEY"))?;
        let cx = self
            .engine_id
            .as_deref()
            .ok_or(SearchError::MissingCredential("GOOGLE_CSE_ID"))?;
        let num = query.result_count.to_string();

        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[("key", key), ("cx", cx), ("q", query.text()), ("num", num.as_str())])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            return Err(SearchError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| SearchError::Body(e.to_string()))?;
        Ok(parsed.items)
    }
}

impl Tool for GoogleSearchTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Searches Google using the Custom Search JSON API. Returns one \"title: link\" line per result."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query to look up"
                },
                "num_results": {
                    "type": "integer",
                    "description": "Number of results to return",
                    "default": DEFAULT_RESULT_COUNT
                }
            },
            "required": ["query"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let query = input["query"]
                .as_str()
                .ok_or_else(|| CrewError::ToolValidation("'query' must be a string".into()))?;
            let count = input["num_results"]
                .as_u64()
                .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
                .unwrap_or(self.default_results);

            let text = self.search(query, count).await;
            Ok(if text.starts_with(ERROR_PREFIX) {
                ToolResult::error(text)
            } else {
                ToolResult::success(text)
            })
        })
    }
}
