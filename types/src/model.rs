//! Provider enumeration and model descriptor parsing.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Provider {
    #[default]
    Claude,
    OpenAI,
    Gemini,
}

impl Provider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::OpenAI => "openai",
            Provider::Gemini => "gemini",
        }
    }

    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Claude => "Anthropic",
            Provider::OpenAI => "OpenAI",
            Provider::Gemini => "Google",
        }
    }

    /// The environment variable that carries this provider's API key.
    ///
    /// Gemini accepts either `GEMINI_API_KEY` or `GOOGLE_API_KEY`; this is
    /// the primary one surfaced in error messages.
    #[must_use]
    pub fn env_var(self) -> &'static str {
        match self {
            Provider::Claude => "ANTHROPIC_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Gemini => "GEMINI_API_KEY",
        }
    }

    /// Parse a provider token from the `provider/model-id` shape.
    ///
    /// Unknown tokens return `None`; the caller falls back to the default
    /// model+provider pair rather than erroring.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Some(Provider::Claude),
            "openai" | "gpt" | "chatgpt" => Some(Provider::OpenAI),
            "gemini" | "google" => Some(Provider::Gemini),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved `provider/model-id` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelName {
    provider: Provider,
    model_id: String,
}

const DEFAULT_MODEL_ID: &str = "claude-sonnet-4-20250514";

impl ModelName {
    #[must_use]
    pub fn new(provider: Provider, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
        }
    }

    #[must_use]
    pub fn default_model() -> Self {
        Self::new(Provider::Claude, DEFAULT_MODEL_ID)
    }

    /// Parse `SMITHERS_MODEL`-shaped input (`provider/model-id`).
    ///
    /// An unparseable or unknown-provider value silently falls back to the
    /// default model.
    #[must_use]
    pub fn parse_or_default(raw: &str) -> Self {
        let Some((provider_token, model_id)) = raw.split_once('/') else {
            return Self::default_model();
        };
        let Some(provider) = Provider::parse(provider_token) else {
            return Self::default_model();
        };
        if model_id.trim().is_empty() {
            return Self::default_model();
        }
        Self::new(provider, model_id)
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        self.provider
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider.as_str(), self.model_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_provider() {
        let model = ModelName::parse_or_default("openai/gpt-4o");
        assert_eq!(model.provider(), Provider::OpenAI);
        assert_eq!(model.model_id(), "gpt-4o");
    }

    #[test]
    fn falls_back_on_unknown_provider() {
        let model = ModelName::parse_or_default("mistral/large");
        assert_eq!(model, ModelName::default_model());
    }

    #[test]
    fn falls_back_on_missing_slash() {
        let model = ModelName::parse_or_default("garbage");
        assert_eq!(model, ModelName::default_model());
    }
}
