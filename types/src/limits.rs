//! Output token and thinking-budget limits.

/// Output limits for a single request. `thinking_budget`, when set, widens
/// `max_tokens` on Claude and is translated to `reasoning_effort`
/// (OpenAI) or `thinking.budgetTokens` (Google) by the respective driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLimits {
    pub max_tokens: u32,
    pub thinking_budget: Option<u32>,
}

impl OutputLimits {
    #[must_use]
    pub fn new(max_tokens: u32) -> Self {
        Self {
            max_tokens,
            thinking_budget: None,
        }
    }

    #[must_use]
    pub fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = Some(budget);
        self
    }

    #[must_use]
    pub fn has_thinking(&self) -> bool {
        self.thinking_budget.is_some()
    }

    /// `max_tokens` widened by the thinking budget, for vendors (Claude)
    /// that count thinking tokens against the same ceiling.
    #[must_use]
    pub fn effective_max_tokens(&self) -> u32 {
        self.max_tokens
            .saturating_add(self.thinking_budget.unwrap_or(0))
    }
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self::new(4096)
    }
}
