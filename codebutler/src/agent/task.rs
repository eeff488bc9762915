//! The unit of work handed to a runner.

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// A task for one run: the user input plus the messaging coordinates the
/// run reports back to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// User messages appended after the system prompt (fresh conversation)
    /// or onto the loaded one (resumed conversation).
    pub messages: Vec<Message>,
    /// Messaging channel for escalations and handoffs.
    pub channel: String,
    /// Thread identifier; also the budget and conflict-tracking key.
    pub thread: String,
}

impl Task {
    /// Create a task with a single user message.
    #[must_use]
    pub fn new(text: impl Into<String>, channel: impl Into<String>, thread: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(text)],
            channel: channel.into(),
            thread: thread.into(),
        }
    }

    /// Create a task with explicit messages.
    #[must_use]
    pub fn with_messages(
        messages: Vec<Message>,
        channel: impl Into<String>,
        thread: impl Into<String>,
    ) -> Self {
        Self {
            messages,
            channel: channel.into(),
            thread: thread.into(),
        }
    }
}
