//! Commonly used types, importable in one line.

pub use crate::agent::{AgentConfig, AgentRunner, RunResult, RunState, Task};
pub use crate::budget::{BudgetConfig, BudgetTracker, Clock, SystemClock};
pub use crate::chat::{ChatProvider, ChatRequest, ChatResponse, MessageSender};
pub use crate::compact::Compactor;
pub use crate::config::RuntimeConfig;
pub use crate::conflict::{ConflictDetector, Overlap, OverlapKind, Severity};
pub use crate::error::{BudgetScope, Error, Result};
pub use crate::fanout::{FanOutConfig, FanOutExecutor, FanOutReport, Thinker};
pub use crate::learn::{LearnWorkflow, needs_learn};
pub use crate::limits::{RateLimiter, ThreadGate};
pub use crate::message::{Message, MessageRole, ToolCall, ToolResult};
pub use crate::progress::{EscapeAction, EscapeLevel, ProgressTracker, StuckSignal};
pub use crate::providers::OpenRouterProvider;
pub use crate::roadmap::{
    DependencyGraph, ItemStatus, ItemWorker, Orchestrator, Roadmap, StatusReporter,
};
pub use crate::roles::{
    ArtistRunner, CoderRunner, LeadRunner, PmRunner, ResearcherRunner, ReviewerRunner, Role,
};
pub use crate::store::{ConversationStore, FileConversationStore, MemoryConversationStore};
pub use crate::tool::{ToolDefinition, ToolExecutor, ToolRegistry};
pub use crate::usage::TokenUsage;
