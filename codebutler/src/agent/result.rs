//! Agent run result types.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::usage::TokenUsage;

/// How a run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// The model produced a final text response.
    Completed,
    /// The turn budget ran out before a final response. Not an error.
    MaxTurnsReached,
    /// Every escape strategy was exhausted and the run was handed off.
    Escalated,
    /// The cancellation token fired.
    Cancelled,
    /// A provider or budget error stopped the run.
    Failed,
}

/// Result of one run, with counters that are valid for every terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Final response text; empty unless `state` is `Completed`.
    pub response: String,
    /// LLM calls consumed, counted over the whole conversation.
    pub turns_used: usize,
    /// Token usage accumulated across this run's turns.
    pub token_usage: TokenUsage,
    /// Total tool calls issued by the assistant during this run.
    pub tool_calls: usize,
    /// How many times stuck detection fired.
    pub loops_detected: usize,
    /// True when the run ended by escalation.
    pub escalated: bool,
    /// Terminal state.
    pub state: RunState,
    /// Error message when `state` is `Failed` or `Cancelled`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    /// True for terminal states that are not errors.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(
            self.state,
            RunState::Completed | RunState::MaxTurnsReached | RunState::Escalated
        )
    }

    /// Convert into `Result`, surfacing failed/cancelled runs as errors.
    pub fn into_result(self) -> Result<Self> {
        match self.state {
            RunState::Cancelled => Err(Error::Cancelled),
            RunState::Failed => Err(Error::validation(
                self.error.unwrap_or_else(|| "run failed".to_owned()),
            )),
            _ => Ok(self),
        }
    }
}

impl Default for RunResult {
    fn default() -> Self {
        Self {
            response: String::new(),
            turns_used: 0,
            token_usage: TokenUsage::zero(),
            tool_calls: 0,
            loops_detected: 0,
            escalated: false,
            state: RunState::Completed,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_states() {
        for state in [
            RunState::Completed,
            RunState::MaxTurnsReached,
            RunState::Escalated,
        ] {
            let result = RunResult {
                state,
                ..RunResult::default()
            };
            assert!(result.is_success());
        }
        let failed = RunResult {
            state: RunState::Failed,
            error: Some("boom".to_owned()),
            ..RunResult::default()
        };
        assert!(!failed.is_success());
        assert!(failed.into_result().is_err());
    }
}
