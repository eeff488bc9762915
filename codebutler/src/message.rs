//! Message types for agent-model communication.
//!
//! Conversations are flat lists of [`Message`] following chat completion
//! API conventions: a system prompt at position zero, then alternating
//! user/assistant turns, with tool results answering assistant tool calls.

use serde::{Deserialize, Serialize};

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message providing instructions.
    System,
    /// User message.
    User,
    /// Assistant (model) message.
    Assistant,
    /// Tool result message answering an assistant tool call.
    Tool,
}

impl MessageRole {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool call made by the model.
///
/// `arguments` is kept as the opaque JSON string the model produced; it is
/// parsed only by the executor. Two calls with byte-identical arguments are
/// considered identical by the progress tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier unique within the conversation.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments as an opaque JSON string.
    pub arguments: String,
}

impl ToolCall {
    /// Create a new tool call.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// The outcome of executing one [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The id of the call this result answers.
    pub tool_call_id: String,
    /// Result body handed back to the model.
    pub content: String,
    /// Whether the execution failed. Error results are still appended to
    /// the conversation so the model can repair.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful tool result.
    #[must_use]
    pub fn ok(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Create an error tool result with the conventional `error: ` prefix.
    #[must_use]
    pub fn error(tool_call_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: format!("error: {message}"),
            is_error: true,
        }
    }
}

/// A chat message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender.
    pub role: MessageRole,
    /// Text content. For assistant messages, meaningful only when the
    /// message carries no tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool calls made by the model (assistant messages only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool call id this message answers (tool messages only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a new system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new assistant message with text content.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new assistant message carrying tool calls.
    #[must_use]
    pub const fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Create a tool result message from a [`ToolResult`].
    #[must_use]
    pub fn tool(result: &ToolResult) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(result.content.clone()),
            tool_calls: None,
            tool_call_id: Some(result.tool_call_id.clone()),
        }
    }

    /// Text content of the message, if any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Check whether this message carries tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .is_some_and(|calls| !calls.is_empty())
    }

    /// True for an assistant message with content and no tool calls —
    /// the terminal shape of a conversation.
    #[must_use]
    pub fn is_final_assistant(&self) -> bool {
        self.role == MessageRole::Assistant && !self.has_tool_calls() && self.content.is_some()
    }
}

/// Count the assistant messages in a conversation prefix.
///
/// The loop uses this to resume the turn counter of a loaded conversation.
#[must_use]
pub fn assistant_turns(messages: &[Message]) -> usize {
    messages
        .iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .count()
}
