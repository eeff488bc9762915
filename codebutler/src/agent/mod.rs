//! The agent loop: prompt → LLM call → tool dispatch → results → repeat.

pub mod config;
pub mod result;
pub mod runner;
pub mod task;

pub use config::AgentConfig;
pub use result::{RunResult, RunState};
pub use runner::AgentRunner;
pub use task::Task;
