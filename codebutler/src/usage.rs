//! Token usage tracking for LLM operations.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Token usage statistics from an LLM operation.
///
/// Accumulated across turns of a run with `+=`; the budget tracker converts
/// accumulated usage to cost via the per-model price table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the input/prompt.
    #[serde(default, alias = "input_tokens")]
    pub prompt_tokens: u64,

    /// Number of tokens in the output/completion.
    #[serde(default, alias = "output_tokens")]
    pub completion_tokens: u64,

    /// Total tokens used (prompt + completion).
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create a new usage record.
    #[must_use]
    pub const fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Create an empty usage record.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        }
    }

    /// Check if no tokens were used.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total_tokens == 0
    }
}

impl Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
