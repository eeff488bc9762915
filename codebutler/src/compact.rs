//! Context-window compaction.
//!
//! When cumulative token usage nears the model's context window, the old
//! middle of the conversation is replaced by a single summary message. The
//! last few assistant groups (an assistant message plus its trailing tool
//! results) are always kept verbatim so the model retains working context.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chat::{ChatProvider, ChatRequest};
use crate::message::{Message, MessageRole};

const SUMMARY_SYSTEM_PROMPT: &str = "You summarize working sessions between an AI coding agent \
     and its tools. Be factual and concise. Keep file paths, command names, and decisions exact.";

const SUMMARY_REQUEST: &str = "Summarize the conversation so far as a bulleted list titled \
     'Progress so far'. Include: facts established, file paths touched, decisions made, and \
     anything still unresolved.";

/// Compaction policy: when to compact and how much recent context to keep.
#[derive(Debug, Clone, Copy)]
pub struct Compactor {
    /// Size of the model's context window in tokens. Zero disables
    /// compaction entirely.
    pub context_window_tokens: u64,
    /// Fraction of the window at which compaction triggers.
    pub threshold: f64,
    /// Number of trailing assistant groups kept verbatim.
    pub recent_keep: usize,
}

impl Default for Compactor {
    fn default() -> Self {
        Self {
            context_window_tokens: 0,
            threshold: 0.8,
            recent_keep: 4,
        }
    }
}

impl Compactor {
    /// Create a compactor for a model with the given context window,
    /// using the default threshold and keep count.
    #[must_use]
    pub fn new(context_window_tokens: u64) -> Self {
        Self {
            context_window_tokens,
            ..Self::default()
        }
    }

    /// Whether cumulative usage has crossed the compaction threshold.
    #[must_use]
    pub fn needs_compaction(&self, total_used: u64) -> bool {
        self.context_window_tokens > 0
            && (total_used as f64) >= self.threshold * (self.context_window_tokens as f64)
    }

    /// Compact `messages`, keeping the system prompt and the last
    /// `recent_keep` assistant groups.
    ///
    /// Returns the input unchanged when there is nothing worth folding or
    /// when the summarization call fails; compaction is never fatal and is
    /// attempted at most once per turn by the caller.
    pub async fn compact_conversation(
        &self,
        provider: &dyn ChatProvider,
        cancel: &CancellationToken,
        model: &str,
        messages: &[Message],
    ) -> Vec<Message> {
        let split = split_index(messages, self.recent_keep);

        // Require at least two messages between the system prompt and the
        // kept tail, otherwise the summary would not pay for itself.
        if split < 3 || messages.is_empty() {
            return messages.to_vec();
        }

        let middle = &messages[1..split];
        let mut summary_messages = Vec::with_capacity(middle.len() + 2);
        summary_messages.push(Message::system(SUMMARY_SYSTEM_PROMPT));
        summary_messages.extend_from_slice(middle);
        summary_messages.push(Message::user(SUMMARY_REQUEST));

        let request = ChatRequest::new(model, summary_messages);
        let summary = match provider.chat(cancel, &request).await {
            Ok(response) => match response.text() {
                Some(text) if !text.trim().is_empty() => text.to_owned(),
                _ => {
                    warn!("compaction summary came back empty, keeping original conversation");
                    return messages.to_vec();
                }
            },
            Err(e) => {
                warn!(error = %e, "compaction call failed, keeping original conversation");
                return messages.to_vec();
            }
        };

        let mut compacted = Vec::with_capacity(2 + messages.len() - split);
        compacted.push(messages[0].clone());
        compacted.push(Message::user(summary));
        compacted.extend_from_slice(&messages[split..]);
        debug!(
            before = messages.len(),
            after = compacted.len(),
            "compacted conversation"
        );
        compacted
    }
}

/// Index of the first message of the `recent_keep`-th assistant group from
/// the end. Messages before this index are candidates for folding.
fn split_index(messages: &[Message], recent_keep: usize) -> usize {
    if recent_keep == 0 {
        return messages.len();
    }
    let mut groups_seen = 0;
    for (idx, message) in messages.iter().enumerate().rev() {
        if message.role == MessageRole::Assistant {
            groups_seen += 1;
            if groups_seen == recent_keep {
                return idx;
            }
        }
    }
    // Fewer assistant groups than we want to keep: nothing to fold.
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ToolCall, ToolResult};
    use crate::providers::mock::MockProvider;

    fn turn(n: usize) -> Vec<Message> {
        vec![
            Message::assistant_tool_calls(vec![ToolCall::new(
                format!("c{n}"),
                "read",
                format!("{{\"n\":{n}}}"),
            )]),
            Message::tool(&ToolResult::ok(format!("c{n}"), format!("data {n}"))),
        ]
    }

    fn conversation(turns: usize) -> Vec<Message> {
        let mut messages = vec![Message::system("sys"), Message::user("go")];
        for n in 0..turns {
            messages.extend(turn(n));
        }
        messages
    }

    #[test]
    fn threshold_math() {
        let compactor = Compactor::new(100_000);
        assert!(!compactor.needs_compaction(79_999));
        assert!(compactor.needs_compaction(80_000));
        assert!(Compactor::new(0).context_window_tokens == 0);
        assert!(!Compactor::new(0).needs_compaction(u64::MAX));
    }

    #[tokio::test]
    async fn keeps_recent_groups_and_system_prompt() {
        let compactor = Compactor {
            context_window_tokens: 1000,
            threshold: 0.8,
            recent_keep: 2,
        };
        let messages = conversation(6);
        let provider = MockProvider::with_texts(vec!["- did things"]);
        let cancel = CancellationToken::new();

        let compacted = compactor
            .compact_conversation(&provider, &cancel, "m", &messages)
            .await;

        // system + summary + 2 kept groups of 2 messages each.
        assert_eq!(compacted.len(), 6);
        assert_eq!(compacted[0], messages[0]);
        assert_eq!(compacted[1].role, MessageRole::User);
        assert_eq!(compacted[1].text(), Some("- did things"));
        assert_eq!(compacted[2..], messages[messages.len() - 4..]);
    }

    #[tokio::test]
    async fn short_conversation_unchanged() {
        let compactor = Compactor {
            context_window_tokens: 1000,
            threshold: 0.8,
            recent_keep: 4,
        };
        let messages = conversation(3);
        let provider = MockProvider::with_texts(vec!["- summary"]);
        let cancel = CancellationToken::new();

        let compacted = compactor
            .compact_conversation(&provider, &cancel, "m", &messages)
            .await;
        assert_eq!(compacted, messages);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn recent_keep_at_least_group_count_is_noop() {
        let compactor = Compactor {
            context_window_tokens: 1000,
            threshold: 0.8,
            recent_keep: 10,
        };
        let messages = conversation(5);
        let provider = MockProvider::with_texts(vec!["- summary"]);
        let cancel = CancellationToken::new();

        let compacted = compactor
            .compact_conversation(&provider, &cancel, "m", &messages)
            .await;
        assert_eq!(compacted, messages);
    }

    #[tokio::test]
    async fn summarization_failure_is_noop() {
        let compactor = Compactor {
            context_window_tokens: 1000,
            threshold: 0.8,
            recent_keep: 1,
        };
        let messages = conversation(6);
        let provider = MockProvider::failing("model offline");
        let cancel = CancellationToken::new();

        let compacted = compactor
            .compact_conversation(&provider, &cancel, "m", &messages)
            .await;
        assert_eq!(compacted, messages);
    }
}
