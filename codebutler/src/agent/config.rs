//! Per-run agent configuration.

use serde::{Deserialize, Serialize};

use crate::roles::Role;

/// Configuration for one agent. Immutable across a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// The role this agent plays.
    pub role: Role,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Hard cap on turns (LLM calls) per run.
    pub max_turns: usize,
    /// System prompt placed at position zero of fresh conversations.
    pub system_prompt: String,
}

impl AgentConfig {
    /// Default turn cap.
    pub const DEFAULT_MAX_TURNS: usize = 30;

    /// Create a config with the default turn cap.
    #[must_use]
    pub fn new(role: Role, model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            role,
            model: model.into(),
            max_turns: Self::DEFAULT_MAX_TURNS,
            system_prompt: system_prompt.into(),
        }
    }

    /// Override the turn cap.
    #[must_use]
    pub const fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = AgentConfig::new(Role::Coder, "claude-sonnet-4", "You write code.");
        assert_eq!(config.max_turns, AgentConfig::DEFAULT_MAX_TURNS);
        let config = config.with_max_turns(5);
        assert_eq!(config.max_turns, 5);
    }
}
