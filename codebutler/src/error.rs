//! Error types for the codebutler runtime.

use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Which budget limit a recording tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetScope {
    /// The per-thread spending limit.
    Thread,
    /// The per-day spending limit.
    Day,
}

impl BudgetScope {
    /// String form used in error messages and status renderings.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Thread => "thread",
            Self::Day => "day",
        }
    }
}

impl std::fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The main error type for runtime operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The LLM provider failed on a specific turn of a run.
    #[error("provider error on turn {turn}: {message}")]
    Provider {
        /// Zero-based turn index at which the call failed.
        turn: usize,
        /// The underlying provider error message.
        message: String,
    },

    /// A tool failed to execute. Inside the loop this is converted into an
    /// error tool result rather than propagated.
    #[error("tool '{tool_name}' failed: {message}")]
    ToolExecution {
        /// Name of the tool that failed.
        tool_name: String,
        /// The underlying error message.
        message: String,
    },

    /// The run's cancellation token fired.
    #[error("run cancelled")]
    Cancelled,

    /// A budget limit was crossed while recording usage. The ledger has
    /// already been updated when this is returned.
    #[error("budget exceeded ({scope}): spent {spent_usd:.4} USD of {limit_usd:.4} USD limit")]
    BudgetExceeded {
        /// Which limit tripped.
        scope: BudgetScope,
        /// Total spend after the triggering record.
        spent_usd: f64,
        /// The configured limit.
        limit_usd: f64,
    },

    /// Conversation or budget persistence failed.
    #[error("store error at {path}: {message}")]
    Store {
        /// Path of the file involved.
        path: String,
        /// The underlying I/O or serialization message.
        message: String,
    },

    /// A roadmap file could not be parsed.
    #[error(transparent)]
    Roadmap(#[from] crate::roadmap::RoadmapParseError),

    /// Configuration could not be loaded or validated.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Invalid input to a runtime operation (fan-out validation, sandbox
    /// rejection, graph cycles).
    #[error("validation error: {0}")]
    Validation(String),

    /// The LLM API answered with an error payload or an unusable response.
    #[error("api error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error from a provider adapter.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Wrap a provider failure with the turn it happened on.
    #[must_use]
    pub fn provider(turn: usize, message: impl Into<String>) -> Self {
        Self::Provider {
            turn,
            message: message.into(),
        }
    }

    /// Create a tool execution error.
    #[must_use]
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a store error for the given path.
    #[must_use]
    pub fn store(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True when this error is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The budget scope, when this is a budget error.
    #[must_use]
    pub const fn budget_scope(&self) -> Option<BudgetScope> {
        match self {
            Self::BudgetExceeded { scope, .. } => Some(*scope),
            _ => None,
        }
    }
}
