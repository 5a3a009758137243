use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CrewError, Result};

/// Top-level crewscout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub crew: CrewConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Extra request headers (set by presets or user).
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

fn default_provider() -> String { "groq".to_string() }
fn default_model_id() -> String { "llama-3.3-70b-versatile".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.7 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            extra_headers: HashMap::new(),
        }
    }
}

/// Google Custom Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Programmable Search Engine id (`cx`).
    #[serde(default)]
    pub engine_id: Option<String>,
    #[serde(default = "default_search_results")]
    pub default_results: u32,
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
}

fn default_search_results() -> u32 { 5 }
fn default_search_endpoint() -> String {
    "https://www.googleapis.com/customsearch/v1".to_string()
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            engine_id: None,
            default_results: default_search_results(),
            endpoint: default_search_endpoint(),
        }
    }
}

/// How the per-task outputs of a crew run are merged into one report.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Output of the last task in execution order.
    #[default]
    Last,
    /// Every task output, each under a heading naming its role.
    Concatenate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrewConfig {
    /// Wall-clock bound for one whole analysis run.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// LLM turns allowed per task before giving up.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default)]
    pub aggregation: Aggregation,
}

fn default_timeout_secs() -> u64 { 180 }
fn default_max_turns() -> usize { 10 }

impl Default for CrewConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_turns: default_max_turns(),
            aggregation: Aggregation::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub token: Option<String>,
    /// How long a finished session keeps its report or error.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token: None,
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

fn default_bind() -> String { "127.0.0.1:8501".to_string() }
fn default_session_ttl_secs() -> u64 { 3600 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| CrewError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded)
            .map_err(|e| CrewError::Config(e.to_string()))
    }

    /// Build a config from `GROQ_API_KEY`, `GOOGLE_API_KEY` and `GOOGLE_CSE_ID`.
    ///
    /// Missing variables are left as `None`; they surface when the search or
    /// LLM call is first made.
    pub fn from_env() -> Self {
        let model = ModelConfig {
            api_key: std::env::var("GROQ_API_KEY").ok(),
            ..ModelConfig::default()
        };
        let search = SearchConfig {
            api_key: std::env::var("GOOGLE_API_KEY").ok(),
            engine_id: std::env::var("GOOGLE_CSE_ID").ok(),
            ..SearchConfig::default()
        };

        Self {
            model,
            search,
            crew: CrewConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }

    /// `~/.crewscout/config.toml`, if a home directory is known.
    pub fn home_config_path() -> Option<PathBuf> {
        dirs_home().map(|h| h.join(".crewscout").join("config.toml"))
    }

    /// A copy with every secret replaced, for display.
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        copy.model.api_key = copy.model.api_key.as_deref().map(mask);
        copy.search.api_key = copy.search.api_key.as_deref().map(mask);
        copy.gateway.token = copy.gateway.token.as_deref().map(mask);
        copy
    }
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_CREWSCOUT_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_CREWSCOUT_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_CREWSCOUT_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_CREWSCOUT_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_CREWSCOUT_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let toml_str = r#"
[model]
api_key = "gsk-test"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.provider, "groq");
        assert_eq!(config.model.model_id, "llama-3.3-70b-versatile");
        assert!((config.model.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.search.default_results, 5);
        assert!(config.search.api_key.is_none());
        assert_eq!(config.crew.timeout_secs, 180);
        assert_eq!(config.crew.aggregation, Aggregation::Last);
        assert_eq!(config.gateway.bind, "127.0.0.1:8501");
        assert!(config.gateway.token.is_none());
        assert_eq!(config.gateway.session_ttl_secs, 3600);
    }

    #[test]
    fn test_aggregation_parses_lowercase() {
        let toml_str = r#"
[model]

[crew]
aggregation = "concatenate"
max_turns = 4
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.crew.aggregation, Aggregation::Concatenate);
        assert_eq!(config.crew.max_turns, 4);
    }

    #[test]
    fn test_masked_hides_secrets() {
        let mut config: AppConfig = toml::from_str("[model]\napi_key = \"gsk_abcdefghijkl\"").unwrap();
        config.search.api_key = Some("short".into());
        let masked = config.masked();
        assert_eq!(masked.model.api_key.as_deref(), Some("gsk_****"));
        assert_eq!(masked.search.api_key.as_deref(), Some("****"));
        assert!(masked.gateway.token.is_none());
    }
}
