//! The agent execution engine.
//!
//! [`AgentRunner::run`] drives one [`Task`] through the LLM↔tools dialogue:
//!
//! 1. Load or initialize the conversation
//! 2. Call the LLM with the active tool definitions
//! 3. Terminal text response → save and return
//! 4. Tool calls → dispatch (concurrently when there are several), append
//!    results in call order, save, loop back to 2
//!
//! The loop is bounded by `max_turns`, watched by a [`ProgressTracker`]
//! whose escape ladder can mutate the conversation and the active tool set,
//! and optionally compacted when token usage nears the context window.
//! Every suspension point honors the run's cancellation token.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::budget::BudgetTracker;
use crate::chat::{ChatProvider, ChatRequest, MessageSender};
use crate::compact::Compactor;
use crate::error::Error;
use crate::message::{Message, ToolResult, assistant_turns};
use crate::progress::{EscapeAction, ProgressTracker, StuckSignal};
use crate::store::ConversationStore;
use crate::tool::{ToolDefinition, ToolExecutor};

use super::config::AgentConfig;
use super::result::{RunResult, RunState};
use super::task::Task;

/// The central engine. Composes the provider, the tool executor, and the
/// optional store/sender/compactor/budget collaborators; role runners wrap
/// this with role-specific prompts and post-processing.
pub struct AgentRunner {
    config: AgentConfig,
    provider: Arc<dyn ChatProvider>,
    executor: Arc<dyn ToolExecutor>,
    store: Option<Arc<dyn ConversationStore>>,
    sender: Option<Arc<dyn MessageSender>>,
    compactor: Option<Compactor>,
    budget: Option<Arc<BudgetTracker>>,
}

impl std::fmt::Debug for AgentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AgentRunner {
    /// Create a runner from the required collaborators.
    #[must_use]
    pub fn new(
        config: AgentConfig,
        provider: Arc<dyn ChatProvider>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            config,
            provider,
            executor,
            store: None,
            sender: None,
            compactor: None,
            budget: None,
        }
    }

    /// Attach a conversation store for crash-safe resume.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach an outbound message sender for escalations.
    #[must_use]
    pub fn with_sender(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Attach a compaction policy.
    #[must_use]
    pub const fn with_compactor(mut self, compactor: Compactor) -> Self {
        self.compactor = Some(compactor);
        self
    }

    /// Attach a budget tracker; every LLM call is recorded against the
    /// task's thread and a tripped limit stops the run.
    #[must_use]
    pub fn with_budget(mut self, budget: Arc<BudgetTracker>) -> Self {
        self.budget = Some(budget);
        self
    }

    /// The agent configuration.
    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Drive the task to a terminal state.
    ///
    /// All terminations — including provider failure and cancellation — are
    /// reported through [`RunResult`] so accumulated counters survive.
    pub async fn run(&self, cancel: &CancellationToken, task: &Task) -> RunResult {
        let role = self.config.role;
        let mut messages = match self.load_conversation(cancel).await {
            Loaded::Cached(result) => return result,
            Loaded::Resumed(messages) => {
                let mut messages = messages;
                messages.extend(task.messages.iter().cloned());
                messages
            }
            Loaded::Fresh => {
                let mut messages = vec![Message::system(&self.config.system_prompt)];
                messages.extend(task.messages.iter().cloned());
                messages
            }
        };

        let start_turn = assistant_turns(&messages);
        let mut tracker = ProgressTracker::new();
        let mut active_tools = self.executor.list_tools();
        let mut result = RunResult {
            turns_used: start_turn,
            ..RunResult::default()
        };

        let run_id = uuid::Uuid::new_v4();
        info!(
            %run_id,
            role = %role,
            model = %self.config.model,
            thread = %task.thread,
            start_turn,
            "run started"
        );

        for turn in start_turn..self.config.max_turns {
            // Cancellation is checked before every LLM call.
            if cancel.is_cancelled() {
                result.state = RunState::Cancelled;
                result.error = Some(Error::Cancelled.to_string());
                return result;
            }

            // Stuck detection and the escape ladder.
            let signal = tracker.detect();
            if signal != StuckSignal::None {
                result.loops_detected += 1;
                debug!(role = %role, turn, ?signal, "stuck signal detected");
                match tracker.next_escape_action(signal) {
                    EscapeAction::Inject { message } => {
                        messages.push(Message::user(message));
                    }
                    EscapeAction::DisableTool { tool, message } => {
                        messages.push(Message::user(message));
                        active_tools = self.filtered_tools(tracker.removed_tools());
                        debug!(role = %role, tool, "tool temporarily disabled");
                    }
                    EscapeAction::Escalate => {
                        self.escalate(cancel, task, signal, result.loops_detected).await;
                        self.save_conversation(cancel, &messages).await;
                        result.state = RunState::Escalated;
                        result.escalated = true;
                        return result;
                    }
                }
            }

            // Compaction, at most once per turn, never fatal.
            if let Some(compactor) = &self.compactor
                && compactor.needs_compaction(result.token_usage.total_tokens)
            {
                messages = compactor
                    .compact_conversation(
                        self.provider.as_ref(),
                        cancel,
                        &self.config.model,
                        &messages,
                    )
                    .await;
            }

            let request =
                ChatRequest::new(&self.config.model, messages.clone()).tools(active_tools.clone());
            let response = match self.provider.chat(cancel, &request).await {
                Ok(response) => response,
                Err(e) if e.is_cancelled() => {
                    result.state = RunState::Cancelled;
                    result.error = Some(e.to_string());
                    return result;
                }
                Err(e) => {
                    let wrapped = Error::provider(turn, e.to_string());
                    warn!(role = %role, turn, error = %wrapped, "provider call failed");
                    result.state = RunState::Failed;
                    result.error = Some(wrapped.to_string());
                    return result;
                }
            };

            result.token_usage += response.usage;
            result.turns_used = turn + 1;

            if let Some(budget) = &self.budget
                && let Err(e) =
                    budget.record(&task.thread, role.as_str(), &self.config.model, response.usage)
            {
                warn!(role = %role, thread = %task.thread, error = %e, "budget limit tripped");
                messages.push(response.message.clone());
                self.save_conversation(cancel, &messages).await;
                result.state = RunState::Failed;
                result.error = Some(e.to_string());
                return result;
            }

            let assistant = response.message;
            if let Some(content) = assistant.text()
                && !content.is_empty()
            {
                tracker.record_response(content);
            }
            messages.push(assistant.clone());

            // Terminal: a text response with no tool calls.
            if !assistant.has_tool_calls() {
                self.save_conversation(cancel, &messages).await;
                result.response = assistant.text().unwrap_or_default().to_owned();
                result.state = RunState::Completed;
                info!(
                    role = %role,
                    turns = result.turns_used,
                    tool_calls = result.tool_calls,
                    "run completed"
                );
                return result;
            }

            let calls = assistant.tool_calls.clone().unwrap_or_default();
            for call in &calls {
                tracker.record_tool_call(&call.name, &call.arguments);
            }
            result.tool_calls += calls.len();

            // Dispatch: several calls run concurrently, one runs inline.
            // Result order always mirrors call order.
            let results: Vec<ToolResult> = if calls.len() >= 2 {
                let futures = calls.iter().map(|call| {
                    let executor = Arc::clone(&self.executor);
                    let cancel = cancel.clone();
                    async move {
                        match executor.execute(&cancel, call).await {
                            Ok(result) => result,
                            Err(e) => ToolResult::error(&call.id, e),
                        }
                    }
                });
                futures::future::join_all(futures).await
            } else {
                let call = &calls[0];
                vec![match self.executor.execute(cancel, call).await {
                    Ok(result) => result,
                    Err(e) => ToolResult::error(&call.id, e),
                }]
            };

            let mut round_had_error = false;
            for tool_result in &results {
                if tool_result.is_error {
                    round_had_error = true;
                    tracker.record_error(&tool_result.content);
                }
                messages.push(Message::tool(tool_result));
            }

            // A clean round while escaping means progress: restore any
            // removed tools and drop the escape state.
            if tracker.is_escaping()
                && !round_had_error
                && tracker.detect() == StuckSignal::None
            {
                let restored = tracker.reset_escape();
                if !restored.is_empty() {
                    active_tools = self.executor.list_tools();
                    debug!(role = %role, ?restored, "escape reset, tools restored");
                }
            }

            self.save_conversation(cancel, &messages).await;
        }

        // Turn budget exhausted: a bounded stop, not an error.
        info!(
            role = %role,
            turns = result.turns_used,
            "run stopped at max turns"
        );
        result.state = RunState::MaxTurnsReached;
        result
    }

    fn filtered_tools(&self, removed: &[String]) -> Vec<ToolDefinition> {
        self.executor
            .list_tools()
            .into_iter()
            .filter(|def| !removed.contains(&def.name))
            .collect()
    }

    async fn load_conversation(&self, cancel: &CancellationToken) -> Loaded {
        let Some(store) = &self.store else {
            return Loaded::Fresh;
        };
        match store.load(cancel).await {
            Ok(Some(messages)) => {
                if let Some(last) = messages.last()
                    && last.is_final_assistant()
                {
                    // The previous run already finished; hand its answer back
                    // without touching the provider.
                    debug!(role = %self.config.role, "returning cached terminal response");
                    return Loaded::Cached(RunResult {
                        response: last.text().unwrap_or_default().to_owned(),
                        turns_used: assistant_turns(&messages),
                        state: RunState::Completed,
                        ..RunResult::default()
                    });
                }
                Loaded::Resumed(messages)
            }
            Ok(None) => Loaded::Fresh,
            Err(e) => {
                warn!(error = %e, "conversation load failed, starting fresh");
                Loaded::Fresh
            }
        }
    }

    async fn save_conversation(&self, cancel: &CancellationToken, messages: &[Message]) {
        if let Some(store) = &self.store
            && let Err(e) = store.save(cancel, messages).await
        {
            warn!(error = %e, "conversation save failed");
        }
    }

    async fn escalate(
        &self,
        cancel: &CancellationToken,
        task: &Task,
        signal: StuckSignal,
        loops_detected: usize,
    ) {
        let role = self.config.role;
        let target = role.escalation_target();
        let text = format!(
            "@{}: agent '{}' on thread '{}' is stuck and has exhausted its escape \
             strategies ({} loop detections; last signal: {}). Please take over or \
             adjust the task.",
            target.salutation(),
            role,
            task.thread,
            loops_detected,
            signal.detail()
        );
        warn!(role = %role, thread = %task.thread, "escalating stuck run");
        if let Some(sender) = &self.sender {
            if let Err(e) = sender
                .send_message(cancel, &task.channel, &task.thread, &text)
                .await
            {
                warn!(error = %e, "escalation send failed");
            }
        }
    }
}

enum Loaded {
    /// Stored conversation already ended in a final answer.
    Cached(RunResult),
    /// Stored conversation is resumable; task messages append onto it.
    Resumed(Vec<Message>),
    /// No stored conversation.
    Fresh,
}
