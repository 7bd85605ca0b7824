//! Per-model context-window thresholds.
//!
//! Keyed loosely by `(Provider, model id prefix)` rather than a closed
//! enum, since `ModelName` accepts arbitrary ids; unrecognized ids fall
//! back to a conservative default window.

use smithers_types::{ModelName, Provider};

const FALLBACK_CONTEXT_LIMIT: u32 = 200_000;

/// `context_limit` is the model's total context window in tokens; the
/// compaction trigger subtracts a reserve from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelLimits {
    pub context_limit: u32,
}

impl ModelLimits {
    #[must_use]
    pub const fn new(context_limit: u32) -> Self {
        Self { context_limit }
    }
}

/// A static table of known model-id prefixes to context windows, with a
/// fallback for anything unrecognized.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelRegistry;

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn get(&self, model: &ModelName) -> ModelLimits {
        let id = model.model_id().to_ascii_lowercase();
        let limit = match model.provider() {
            Provider::Claude if id.contains("opus") => 1_000_000,
            Provider::Claude if id.contains("haiku") => 200_000,
            Provider::Claude => 200_000,
            Provider::OpenAI => 400_000,
            Provider::Gemini => 1_048_576,
        };
        ModelLimits::new(limit)
    }

    #[must_use]
    pub fn fallback() -> ModelLimits {
        ModelLimits::new(FALLBACK_CONTEXT_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_opus_gets_million_token_window() {
        let registry = ModelRegistry::new();
        let model = ModelName::new(Provider::Claude, "claude-opus-4-6");
        assert_eq!(registry.get(&model).context_limit, 1_000_000);
    }

    #[test]
    fn claude_sonnet_gets_two_hundred_k_window() {
        let registry = ModelRegistry::new();
        let model = ModelName::new(Provider::Claude, "claude-sonnet-4-20250514");
        assert_eq!(registry.get(&model).context_limit, 200_000);
    }

    #[test]
    fn gemini_gets_million_token_window() {
        let registry = ModelRegistry::new();
        let model = ModelName::new(Provider::Gemini, "gemini-2.5-pro");
        assert_eq!(registry.get(&model).context_limit, 1_048_576);
    }

    #[test]
    fn openai_gets_four_hundred_k_window() {
        let registry = ModelRegistry::new();
        let model = ModelName::new(Provider::OpenAI, "gpt-5.2");
        assert_eq!(registry.get(&model).context_limit, 400_000);
    }

    #[test]
    fn fallback_is_conservative() {
        assert_eq!(ModelRegistry::fallback().context_limit, 200_000);
    }
}
