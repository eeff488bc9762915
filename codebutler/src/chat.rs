//! Chat types and the provider/sender traits the loop is built on.
//!
//! The runtime consumes the LLM through a single operation,
//! [`ChatProvider::chat`], and reaches users or other agents through
//! [`MessageSender::send_message`]. Both traits accept a cancellation token
//! so callers can abandon in-flight calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::message::Message;
use crate::tool::ToolDefinition;
use crate::usage::TokenUsage;

/// A chat completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model identifier (e.g. `"anthropic/claude-opus-4.5"`).
    pub model: String,

    /// Conversation messages, system prompt first.
    pub messages: Vec<Message>,

    /// Tools available for the model to call. `None` disables tool use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
}

impl ChatRequest {
    /// Create a request with messages and no tools.
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: None,
        }
    }

    /// Attach tool definitions. An empty list is normalized to `None`.
    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = if tools.is_empty() { None } else { Some(tools) };
        self
    }
}

/// A chat completion response: the assistant message plus usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated assistant message.
    pub message: Message,
    /// Token usage for this call.
    #[serde(default)]
    pub usage: TokenUsage,
}

impl ChatResponse {
    /// Create a response from a message and usage.
    #[must_use]
    pub const fn new(message: Message, usage: TokenUsage) -> Self {
        Self { message, usage }
    }

    /// Text content of the assistant message, if any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.message.text()
    }
}

/// The LLM provider contract.
///
/// Implementations map [`Message`] and [`ToolDefinition`] onto their wire
/// schema; tool parameter blobs pass through opaquely.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Issue one chat completion.
    async fn chat(
        &self,
        cancel: &CancellationToken,
        request: &ChatRequest,
    ) -> Result<ChatResponse>;
}

/// Outbound messaging contract, used for escalations and role-to-role
/// handoffs. Send failures are logged by callers, never fatal to a run.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Deliver `text` to the given channel/thread.
    async fn send_message(
        &self,
        cancel: &CancellationToken,
        channel: &str,
        thread: &str,
        text: &str,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tools_normalized() {
        let request = ChatRequest::new("m", vec![Message::user("hi")]).tools(vec![]);
        assert!(request.tools.is_none());
    }

    #[test]
    fn response_text_passthrough() {
        let response = ChatResponse::new(Message::assistant("ok"), TokenUsage::new(1, 1));
        assert_eq!(response.text(), Some("ok"));
    }
}
