use std::io::Write;

use crewscout_core::config::{Aggregation, AppConfig};
use crewscout_core::error::CrewError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[model]
provider = "groq"
model_id = "llama-3.3-70b-versatile"
api_key = "gsk-test-key"
max_tokens = 2048
temperature = 0.7

[search]
api_key = "google-key"
engine_id = "cx-123"
default_results = 8

[crew]
timeout_secs = 240
max_turns = 6
aggregation = "concatenate"

[gateway]
bind = "0.0.0.0:9999"
token = "test-token"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.provider, "groq");
    assert_eq!(config.model.api_key, Some("gsk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, 2048);

    assert_eq!(config.search.engine_id.as_deref(), Some("cx-123"));
    assert_eq!(config.search.default_results, 8);
    assert_eq!(
        config.search.endpoint,
        "https://www.googleapis.com/customsearch/v1"
    );

    assert_eq!(config.crew.timeout_secs, 240);
    assert_eq!(config.crew.max_turns, 6);
    assert_eq!(config.crew.aggregation, Aggregation::Concatenate);

    assert_eq!(config.gateway.bind, "0.0.0.0:9999");
    assert_eq!(config.gateway.token.as_deref(), Some("test-token"));
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("CREWSCOUT_TEST_GROQ_KEY", "expanded-key-value");

    let toml_content = r#"
[model]
api_key = "${CREWSCOUT_TEST_GROQ_KEY}"

[search]
api_key = "${CREWSCOUT_TEST_UNSET_VAR}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.model.api_key.as_deref(), Some("expanded-key-value"));
    // Unset variables are kept verbatim.
    assert_eq!(
        config.search.api_key.as_deref(),
        Some("${CREWSCOUT_TEST_UNSET_VAR}")
    );

    std::env::remove_var("CREWSCOUT_TEST_GROQ_KEY");
}

#[test]
fn test_missing_file_is_config_not_found() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let err = AppConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, CrewError::ConfigNotFound(_)));
}

#[test]
fn test_invalid_toml_is_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[model\nprovider = ").expect("write toml");

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, CrewError::Config(_)));
}

#[test]
fn test_example_config_parses() {
    let example = include_str!("../crewscout.toml.example");
    let config: AppConfig = toml::from_str(example).expect("example parses");
    assert_eq!(config.model.model_id, "llama-3.3-70b-versatile");
    assert_eq!(config.crew.timeout_secs, 180);
    assert_eq!(config.gateway.bind, "127.0.0.1:8501");
}
