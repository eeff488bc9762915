//! Scripted test doubles for the provider, executor, and sender contracts.
//!
//! [`MockProvider`] returns a fixed sequence of responses and records every
//! request it sees, so tests can assert on exact request shapes and call
//! counts without a network.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatProvider, ChatRequest, ChatResponse, MessageSender};
use crate::error::{Error, Result};
use crate::message::{Message, ToolCall, ToolResult};
use crate::tool::{ToolDefinition, ToolExecutor};
use crate::usage::TokenUsage;

/// Usage attached to every scripted response.
const SCRIPTED_USAGE: TokenUsage = TokenUsage::new(10, 5);

enum ScriptStep {
    Respond(ChatResponse),
    Fail(String),
}

/// A provider that replays a script of responses in order.
pub struct MockProvider {
    script: Vec<ScriptStep>,
    cursor: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("steps", &self.script.len())
            .field("calls", &self.cursor.load(Ordering::SeqCst))
            .finish()
    }
}

impl MockProvider {
    fn from_steps(script: Vec<ScriptStep>) -> Self {
        Self {
            script,
            cursor: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that answers with the given texts, in order.
    #[must_use]
    pub fn with_texts(texts: Vec<&str>) -> Self {
        Self::from_steps(
            texts
                .into_iter()
                .map(|t| {
                    ScriptStep::Respond(ChatResponse::new(Message::assistant(t), SCRIPTED_USAGE))
                })
                .collect(),
        )
    }

    /// A provider that replays the given assistant messages, in order.
    #[must_use]
    pub fn with_script(messages: Vec<Message>) -> Self {
        Self::from_steps(
            messages
                .into_iter()
                .map(|m| ScriptStep::Respond(ChatResponse::new(m, SCRIPTED_USAGE)))
                .collect(),
        )
    }

    /// A provider whose every call fails with the given message.
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            script: vec![ScriptStep::Fail(message.to_owned())],
            cursor: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose first `succeed` calls answer `"ok"` and whose later
    /// calls fail with the given message.
    #[must_use]
    pub fn failing_after(succeed: usize, message: &str) -> Self {
        let mut script: Vec<ScriptStep> = (0..succeed)
            .map(|_| {
                ScriptStep::Respond(ChatResponse::new(Message::assistant("ok"), SCRIPTED_USAGE))
            })
            .collect();
        script.push(ScriptStep::Fail(message.to_owned()));
        Self::from_steps(script)
    }

    /// Number of chat calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Snapshot of every request seen, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn chat(
        &self,
        cancel: &CancellationToken,
        request: &ChatRequest,
    ) -> Result<ChatResponse> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.requests.lock().push(request.clone());
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        // A failing provider keeps failing; a script must not run dry.
        let step = self
            .script
            .get(index)
            .or_else(|| self.script.last())
            .ok_or_else(|| Error::validation("mock provider has no scripted responses"))?;
        match step {
            ScriptStep::Respond(response) => Ok(response.clone()),
            ScriptStep::Fail(message) => Err(Error::validation(message.clone())),
        }
    }
}

/// What a mocked tool does when called.
#[derive(Debug, Clone)]
pub enum ToolBehavior {
    /// Reply immediately with the given content.
    Reply(String),
    /// Sleep, then reply. Used to exercise result ordering.
    ReplyAfter(String, Duration),
    /// Fail with the given message.
    Fail(String),
}

/// A tool executor with scripted per-tool behavior.
#[derive(Debug, Default)]
pub struct MockExecutor {
    tools: Vec<ToolDefinition>,
    behaviors: HashMap<String, ToolBehavior>,
    executed: Mutex<Vec<String>>,
}

impl MockExecutor {
    /// An executor with no tools at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a tool with the given behavior.
    #[must_use]
    pub fn with_tool(mut self, name: &str, behavior: ToolBehavior) -> Self {
        self.tools.push(ToolDefinition::new(
            name,
            format!("mock tool {name}"),
            serde_json::json!({"type": "object"}),
        ));
        self.behaviors.insert(name.to_owned(), behavior);
        self
    }

    /// Names of every executed call, in completion order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl ToolExecutor for MockExecutor {
    fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.clone()
    }

    async fn execute(&self, cancel: &CancellationToken, call: &ToolCall) -> Result<ToolResult> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let behavior = self
            .behaviors
            .get(&call.name)
            .ok_or_else(|| Error::tool(&call.name, "tool not found"))?
            .clone();
        let result = match behavior {
            ToolBehavior::Reply(content) => Ok(ToolResult::ok(&call.id, content)),
            ToolBehavior::ReplyAfter(content, delay) => {
                tokio::time::sleep(delay).await;
                Ok(ToolResult::ok(&call.id, content))
            }
            ToolBehavior::Fail(message) => Err(Error::tool(&call.name, message)),
        };
        self.executed.lock().push(call.name.clone());
        result
    }
}

/// A sender that records every message.
#[derive(Debug, Default)]
pub struct MockSender {
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

/// One recorded outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Channel the message was addressed to.
    pub channel: String,
    /// Thread the message was addressed to.
    pub thread: String,
    /// Message body.
    pub text: String,
}

impl MockSender {
    /// Create an empty sender.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MessageSender for MockSender {
    async fn send_message(
        &self,
        cancel: &CancellationToken,
        channel: &str,
        thread: &str,
        text: &str,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.sent.lock().push(SentMessage {
            channel: channel.to_owned(),
            thread: thread.to_owned(),
            text: text.to_owned(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provider_replays_in_order_and_records_requests() {
        let provider = MockProvider::with_texts(vec!["one", "two"]);
        let cancel = CancellationToken::new();
        let request = ChatRequest::new("m", vec![Message::user("hi")]);

        let first = provider.chat(&cancel, &request).await.expect("chat");
        assert_eq!(first.text(), Some("one"));
        let second = provider.chat(&cancel, &request).await.expect("chat");
        assert_eq!(second.text(), Some("two"));
        assert_eq!(provider.calls(), 2);
        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn failing_provider_keeps_failing() {
        let provider = MockProvider::failing("down");
        let cancel = CancellationToken::new();
        let request = ChatRequest::new("m", vec![]);
        assert!(provider.chat(&cancel, &request).await.is_err());
        assert!(provider.chat(&cancel, &request).await.is_err());
    }

    #[tokio::test]
    async fn executor_behaviors() {
        let executor = MockExecutor::empty()
            .with_tool("read", ToolBehavior::Reply("data".to_owned()))
            .with_tool("flaky", ToolBehavior::Fail("no luck".to_owned()));
        let cancel = CancellationToken::new();

        let ok = executor
            .execute(&cancel, &ToolCall::new("c1", "read", "{}"))
            .await
            .expect("execute");
        assert_eq!(ok.content, "data");

        let err = executor
            .execute(&cancel, &ToolCall::new("c2", "flaky", "{}"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no luck"));
        assert_eq!(executor.executed(), vec!["read", "flaky"]);
    }

    #[tokio::test]
    async fn sender_records_messages() {
        let sender = MockSender::new();
        let cancel = CancellationToken::new();
        sender
            .send_message(&cancel, "chan", "t1", "hello")
            .await
            .expect("send");
        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "hello");
    }
}
