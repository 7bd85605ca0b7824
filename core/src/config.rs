//! Boundary: resolves runtime configuration from environment variables.
//!
//! All `std::env::var` access lives here; the rest of the crate consumes
//! the plain [`AppConfig`] struct it produces.

use smithers_types::{ModelName, Provider};

const DEFAULT_COMPACTION_RESERVE_TOKENS: u32 = 16_384;
const DEFAULT_COMPACTION_CONTEXT_LIMIT: u32 = 200_000;

/// Resolved, boundary-free application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: ModelName,
    pub tracing_filter: String,
    pub compaction: CompactionSettings,
}

/// Compaction trigger parameters. `reserve_tokens` and
/// `context_limit_override` let an operator tune the trigger without
/// touching the per-model registry; `enabled = false` disables
/// compaction entirely.
#[derive(Debug, Clone, Copy)]
pub struct CompactionSettings {
    pub enabled: bool,
    pub reserve_tokens: u32,
    pub context_limit_override: Option<u32>,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            reserve_tokens: DEFAULT_COMPACTION_RESERVE_TOKENS,
            context_limit_override: None,
        }
    }
}

impl AppConfig {
    /// Resolves configuration from the process environment. Never fails:
    /// an unparseable or absent `SMITHERS_MODEL` falls back to the
    /// compiled-in default, mirroring [`ModelName::parse_or_default`].
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key).ok())
    }

    /// Testable variant of [`Self::from_env`] taking an injectable lookup
    /// function instead of touching the real process environment.
    #[must_use]
    pub fn from_env_fn(get: impl Fn(&str) -> Option<String>) -> Self {
        let model = get("SMITHERS_MODEL")
            .map(|raw| ModelName::parse_or_default(&raw))
            .unwrap_or_else(ModelName::default_model);

        let tracing_filter = get("SMITHERS_DEBUG_LEVEL").unwrap_or_else(|| "info".to_string());

        let enabled = get("SMITHERS_COMPACTION_DISABLED").is_none();
        let reserve_tokens = get("SMITHERS_COMPACTION_RESERVE_TOKENS")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_COMPACTION_RESERVE_TOKENS);
        let context_limit_override = get("SMITHERS_COMPACTION_CONTEXT_LIMIT").and_then(|raw| raw.parse().ok());

        Self {
            model,
            tracing_filter,
            compaction: CompactionSettings {
                enabled,
                reserve_tokens,
                context_limit_override,
            },
        }
    }
}

/// Looks up the API key environment variable for `provider`, following
/// Gemini's documented fallback to `GOOGLE_API_KEY`.
#[must_use]
pub fn lookup_api_key(provider: Provider, get: impl Fn(&str) -> Option<String>) -> Option<String> {
    if let Some(key) = get(provider.env_var()) {
        return Some(key);
    }
    if provider == Provider::Gemini {
        return get("GOOGLE_API_KEY");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_model_when_env_absent() {
        let config = AppConfig::from_env_fn(|_| None);
        assert_eq!(config.model, ModelName::default_model());
        assert_eq!(config.tracing_filter, "info");
        assert!(config.compaction.enabled);
    }

    #[test]
    fn reads_model_and_debug_level_from_env() {
        let config = AppConfig::from_env_fn(|key| match key {
            "SMITHERS_MODEL" => Some("openai/gpt-4o".to_string()),
            "SMITHERS_DEBUG_LEVEL" => Some("debug".to_string()),
            _ => None,
        });
        assert_eq!(config.model.provider(), Provider::OpenAI);
        assert_eq!(config.tracing_filter, "debug");
    }

    #[test]
    fn compaction_disabled_flag_is_respected() {
        let config = AppConfig::from_env_fn(|key| (key == "SMITHERS_COMPACTION_DISABLED").then(|| "1".to_string()));
        assert!(!config.compaction.enabled);
    }

    #[test]
    fn gemini_key_falls_back_to_google_api_key() {
        let key = lookup_api_key(Provider::Gemini, |k| (k == "GOOGLE_API_KEY").then(|| "secret".to_string()));
        assert_eq!(key.as_deref(), Some("secret"));
    }

    #[test]
    fn claude_key_does_not_fall_back() {
        let key = lookup_api_key(Provider::Claude, |k| (k == "GOOGLE_API_KEY").then(|| "secret".to_string()));
        assert_eq!(key, None);
    }
}
