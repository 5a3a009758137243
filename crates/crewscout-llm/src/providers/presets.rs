use crewscout_core::config::ModelConfig;

/// A named provider preset for OpenAI-compatible APIs.
pub struct ProviderPreset {
    pub default_base_url: &'static str,
    pub needs_api_key: bool,
    pub extra_headers: &'static [(&'static str, &'static str)],
}

/// Look up a provider preset by name.
pub fn get_preset(provider: &str) -> Option<ProviderPreset> {
    match provider {
        "groq" => Some(ProviderPreset {
            default_base_url: "https://api.groq.com/openai/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[],
        }),
        "openai" => Some(ProviderPreset {
            default_base_url: "https://api.openai.com/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[],
        }),
        "ollama" => Some(ProviderPreset {
            default_base_url: "http://localhost:11434/v1/chat/completions",
            needs_api_key: false,
            extra_headers: &[],
        }),
        "openrouter" => Some(ProviderPreset {
            default_base_url: "https://openrouter.ai/api/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[("X-Title", "crewscout")],
        }),
        "together" => Some(ProviderPreset {
            default_base_url: "https://api.together.xyz/v1/chat/completions",
            needs_api_key: true,
            extra_headers: &[],
        }),
        _ => None,
    }
}

/// Fill `base_url` and preset headers for known providers.
///
/// Values the user already set are left alone.
pub fn apply_preset_defaults(config: &mut ModelConfig) {
    let Some(preset) = get_preset(&config.provider) else {
        return;
    };

    if config.base_url.is_none() {
        config.base_url = Some(preset.default_base_url.to_string());
    }
    for (k, v) in preset.extra_headers {
        config
            .extra_headers
            .entry(k.to_string())
            .or_insert_with(|| v.to_string());
    }
    if preset.needs_api_key && config.api_key.is_none() {
        tracing::warn!(
            provider = %config.provider,
            "No API key configured; LLM requests will be rejected"
        );
    }
}
