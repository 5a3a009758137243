pub mod providers;
pub mod streaming;

use crewscout_core::config::ModelConfig;
use crewscout_core::traits::LlmClient;

pub use providers::openai::OpenAiClient;
pub use providers::presets::{apply_preset_defaults, get_preset};

/// Create an LLM client for the configured provider.
///
/// Every supported provider speaks the OpenAI chat-completions protocol;
/// presets only differ in base URL and headers.
pub fn create_client(config: &ModelConfig) -> Box<dyn LlmClient> {
    if get_preset(&config.provider).is_none() && config.base_url.is_none() {
        tracing::warn!(
            provider = %config.provider,
            "Unknown provider without base_url; using the OpenAI endpoint"
        );
    }
    Box::new(OpenAiClient::new())
}
