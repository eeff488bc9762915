//! Stuck-loop detection and the graded escape ladder.
//!
//! The tracker keeps three rolling windows — tool-call fingerprints, error
//! messages, and response fingerprints — and reports a [`StuckSignal`] when
//! the tail of a window repeats. Once stuck, an agent climbs a fixed ladder
//! of escape strategies, spending a bounded number of turns on each before
//! advancing, until it either makes progress or escalates to a human/PM.
//!
//! The tracker is owned by a single runner and is not synchronized.

use std::collections::VecDeque;

use sha2::{Digest, Sha256};

/// Why the agent appears stuck, in detection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckSignal {
    /// Nothing suspicious in the windows.
    None,
    /// The same tool was called with byte-identical parameters repeatedly.
    SameToolParams,
    /// Tool calls keep failing with the same error.
    SameError,
    /// Assistant responses are not changing.
    NoProgress,
}

impl StuckSignal {
    /// Human-readable description injected into reflection prompts.
    #[must_use]
    pub const fn detail(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::SameToolParams => {
                "You have called the same tool with the same parameters several times in a row."
            }
            Self::SameError => "Your recent tool calls all failed with the same error.",
            Self::NoProgress => "Your recent responses are repeating without new progress.",
        }
    }
}

/// The escape strategy currently in effect. Levels only move forward during
/// a stuck episode; observed progress resets to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EscapeLevel {
    /// Not escaping.
    None,
    /// Ask the agent to stop and reflect.
    Reflection,
    /// Force an enumeration of attempted approaches.
    ForceReasoning,
    /// Temporarily remove the tool the agent is stuck on.
    ReduceTools,
    /// Give up and hand the problem to a human or the PM.
    Escalate,
}

impl EscapeLevel {
    const fn next(self) -> Self {
        match self {
            Self::None => Self::Reflection,
            Self::Reflection => Self::ForceReasoning,
            Self::ForceReasoning => Self::ReduceTools,
            Self::ReduceTools | Self::Escalate => Self::Escalate,
        }
    }
}

/// What the loop should do this turn to break the stuck episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscapeAction {
    /// Append a user-role message nudging the agent.
    Inject {
        /// The message to append.
        message: String,
    },
    /// Remove a tool from the active set and tell the agent.
    DisableTool {
        /// Name of the tool to withhold.
        tool: String,
        /// The message to append.
        message: String,
    },
    /// Stop the run and notify outward.
    Escalate,
}

/// Truncated hex digest used to fingerprint tool calls and responses.
fn fingerprint(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in &digest[..8] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn push_bounded(window: &mut VecDeque<String>, value: String, cap: usize) {
    if window.len() == cap {
        window.pop_front();
    }
    window.push_back(value);
}

fn tail_repeats(window: &VecDeque<String>, threshold: usize) -> bool {
    if window.len() < threshold {
        return false;
    }
    let mut iter = window.iter().rev().take(threshold);
    let Some(last) = iter.next() else {
        return false;
    };
    iter.all(|v| v == last)
}

/// Rolling-window stuck detector plus escape-ladder state machine.
#[derive(Debug)]
pub struct ProgressTracker {
    window_size: usize,
    threshold: usize,
    turns_per_strategy: usize,

    tool_fingerprints: VecDeque<String>,
    errors: VecDeque<String>,
    response_fingerprints: VecDeque<String>,

    level: EscapeLevel,
    turns_in_level: usize,
    stuck_tool: Option<String>,
    removed_tools: Vec<String>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    /// Window size for each rolling buffer.
    pub const WINDOW_SIZE: usize = 5;
    /// How many identical tail entries constitute a stuck signal.
    pub const THRESHOLD: usize = 3;
    /// Turns spent on each escape strategy before advancing.
    pub const TURNS_PER_STRATEGY: usize = 2;

    /// Create a tracker with the default window, threshold, and pacing.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(Self::WINDOW_SIZE, Self::THRESHOLD, Self::TURNS_PER_STRATEGY)
    }

    /// Create a tracker with explicit limits.
    #[must_use]
    pub fn with_limits(window_size: usize, threshold: usize, turns_per_strategy: usize) -> Self {
        Self {
            window_size,
            threshold,
            turns_per_strategy,
            tool_fingerprints: VecDeque::with_capacity(window_size),
            errors: VecDeque::with_capacity(window_size),
            response_fingerprints: VecDeque::with_capacity(window_size),
            level: EscapeLevel::None,
            turns_in_level: 0,
            stuck_tool: None,
            removed_tools: Vec::new(),
        }
    }

    /// Record a tool call. The most recent call becomes the candidate for
    /// removal if the ladder reaches [`EscapeLevel::ReduceTools`].
    pub fn record_tool_call(&mut self, name: &str, arguments: &str) {
        let fp = fingerprint(&format!("{name}|{arguments}"));
        push_bounded(&mut self.tool_fingerprints, fp, self.window_size);
        self.stuck_tool = Some(name.to_owned());
    }

    /// Record a tool error message.
    pub fn record_error(&mut self, message: &str) {
        push_bounded(&mut self.errors, message.to_owned(), self.window_size);
    }

    /// Record assistant response content.
    pub fn record_response(&mut self, content: &str) {
        let fp = fingerprint(content);
        push_bounded(&mut self.response_fingerprints, fp, self.window_size);
    }

    /// Evaluate the windows. The first matching signal wins: identical tool
    /// params, then identical errors, then identical responses.
    #[must_use]
    pub fn detect(&self) -> StuckSignal {
        if tail_repeats(&self.tool_fingerprints, self.threshold) {
            StuckSignal::SameToolParams
        } else if tail_repeats(&self.errors, self.threshold) {
            StuckSignal::SameError
        } else if tail_repeats(&self.response_fingerprints, self.threshold) {
            StuckSignal::NoProgress
        } else {
            StuckSignal::None
        }
    }

    /// The escape level currently in effect.
    #[must_use]
    pub const fn level(&self) -> EscapeLevel {
        self.level
    }

    /// True while an escape strategy is active.
    #[must_use]
    pub fn is_escaping(&self) -> bool {
        self.level != EscapeLevel::None
    }

    /// Tools currently withheld from the active definition set.
    #[must_use]
    pub fn removed_tools(&self) -> &[String] {
        &self.removed_tools
    }

    /// Advance the ladder one turn and return the action to apply.
    ///
    /// Each level is retried for a bounded number of turns before the next
    /// one takes over; the final level is always [`EscapeAction::Escalate`].
    pub fn next_escape_action(&mut self, signal: StuckSignal) -> EscapeAction {
        if self.level == EscapeLevel::None || self.turns_in_level >= self.turns_per_strategy {
            self.level = self.level.next();
            self.turns_in_level = 0;
        }
        self.turns_in_level += 1;

        match self.level {
            EscapeLevel::None => unreachable!("ladder always advances out of None"),
            EscapeLevel::Reflection => EscapeAction::Inject {
                message: format!(
                    "You appear to be in a loop. {} Stop and reflect: what have you tried, \
                     why didn't it work, and what fundamentally different approach could \
                     you take?",
                    signal.detail()
                ),
            },
            EscapeLevel::ForceReasoning => EscapeAction::Inject {
                message: "Before doing anything else, list every approach you have tried so \
                          far and why each one failed. Then propose one approach you have \
                          not tried yet and pursue that instead."
                    .to_owned(),
            },
            EscapeLevel::ReduceTools => {
                if let Some(tool) = self.stuck_tool.clone() {
                    if !self.removed_tools.contains(&tool) {
                        self.removed_tools.push(tool.clone());
                    }
                    EscapeAction::DisableTool {
                        message: format!(
                            "The tool '{tool}' has been temporarily disabled because \
                             repeated calls to it were not making progress. Solve the \
                             problem another way."
                        ),
                        tool,
                    }
                } else {
                    // No tool to remove; skip straight to escalation.
                    self.level = EscapeLevel::Escalate;
                    EscapeAction::Escalate
                }
            }
            EscapeLevel::Escalate => EscapeAction::Escalate,
        }
    }

    /// Clear the escape state after observed progress: the level, the turn
    /// counter, the remembered stuck tool, and the removed-tool list.
    ///
    /// Returns the tools that should be restored to the active set.
    pub fn reset_escape(&mut self) -> Vec<String> {
        self.level = EscapeLevel::None;
        self.turns_in_level = 0;
        self.stuck_tool = None;
        std::mem::take(&mut self.removed_tools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_identical_tool_calls_fire() {
        let mut tracker = ProgressTracker::new();
        for _ in 0..3 {
            tracker.record_tool_call("read", r#"{"path":"main.rs"}"#);
        }
        assert_eq!(tracker.detect(), StuckSignal::SameToolParams);
    }

    #[test]
    fn distinct_tool_calls_do_not_fire() {
        let mut tracker = ProgressTracker::new();
        tracker.record_tool_call("read", r#"{"path":"a.rs"}"#);
        tracker.record_tool_call("read", r#"{"path":"b.rs"}"#);
        tracker.record_tool_call("read", r#"{"path":"c.rs"}"#);
        assert_eq!(tracker.detect(), StuckSignal::None);
    }

    #[test]
    fn two_identical_calls_are_not_enough() {
        let mut tracker = ProgressTracker::new();
        tracker.record_tool_call("read", "{}");
        tracker.record_tool_call("read", "{}");
        assert_eq!(tracker.detect(), StuckSignal::None);
    }

    #[test]
    fn same_tool_params_outranks_same_error() {
        let mut tracker = ProgressTracker::new();
        for _ in 0..3 {
            tracker.record_tool_call("write", r#"{"path":"x"}"#);
            tracker.record_error("permission denied");
        }
        assert_eq!(tracker.detect(), StuckSignal::SameToolParams);
    }

    #[test]
    fn same_error_outranks_no_progress() {
        let mut tracker = ProgressTracker::new();
        for i in 0..3 {
            tracker.record_tool_call("write", &format!("{{\"n\":{i}}}"));
            tracker.record_error("permission denied");
            tracker.record_response("still trying");
        }
        assert_eq!(tracker.detect(), StuckSignal::SameError);
    }

    #[test]
    fn repeated_responses_fire_no_progress() {
        let mut tracker = ProgressTracker::new();
        for _ in 0..3 {
            tracker.record_response("the same answer");
        }
        assert_eq!(tracker.detect(), StuckSignal::NoProgress);
    }

    #[test]
    fn window_is_bounded() {
        let mut tracker = ProgressTracker::new();
        for i in 0..10 {
            tracker.record_tool_call("read", &format!("{{\"n\":{i}}}"));
        }
        assert_eq!(tracker.tool_fingerprints.len(), ProgressTracker::WINDOW_SIZE);
    }

    #[test]
    fn ladder_advances_after_two_turns_per_level() {
        let mut tracker = ProgressTracker::new();
        for _ in 0..3 {
            tracker.record_tool_call("read", "{}");
        }
        let signal = tracker.detect();

        // Two turns of reflection.
        assert!(matches!(
            tracker.next_escape_action(signal),
            EscapeAction::Inject { .. }
        ));
        assert_eq!(tracker.level(), EscapeLevel::Reflection);
        tracker.next_escape_action(signal);
        assert_eq!(tracker.level(), EscapeLevel::Reflection);

        // Two turns of forced reasoning.
        tracker.next_escape_action(signal);
        assert_eq!(tracker.level(), EscapeLevel::ForceReasoning);
        tracker.next_escape_action(signal);

        // Tool removal.
        let action = tracker.next_escape_action(signal);
        assert_eq!(tracker.level(), EscapeLevel::ReduceTools);
        match action {
            EscapeAction::DisableTool { tool, .. } => assert_eq!(tool, "read"),
            other => panic!("expected DisableTool, got {other:?}"),
        }
        assert_eq!(tracker.removed_tools(), ["read"]);
        tracker.next_escape_action(signal);

        // Terminal.
        assert_eq!(tracker.next_escape_action(signal), EscapeAction::Escalate);
        assert_eq!(tracker.level(), EscapeLevel::Escalate);
    }

    #[test]
    fn reset_restores_removed_tools() {
        let mut tracker = ProgressTracker::new();
        for _ in 0..3 {
            tracker.record_tool_call("grep", "{}");
        }
        let signal = tracker.detect();
        for _ in 0..5 {
            tracker.next_escape_action(signal);
        }
        assert_eq!(tracker.removed_tools(), ["grep"]);

        let restored = tracker.reset_escape();
        assert_eq!(restored, ["grep"]);
        assert_eq!(tracker.level(), EscapeLevel::None);
        assert!(tracker.removed_tools().is_empty());
    }

    #[test]
    fn reduce_tools_without_candidate_escalates() {
        let mut tracker = ProgressTracker::new();
        for _ in 0..3 {
            tracker.record_response("same");
        }
        let signal = tracker.detect();
        // Burn through reflection and forced reasoning.
        for _ in 0..4 {
            tracker.next_escape_action(signal);
        }
        // No tool was ever recorded, so the ladder skips removal.
        assert_eq!(tracker.next_escape_action(signal), EscapeAction::Escalate);
    }
}
