//! The reviewer runner: bounded review rounds and issue parsing.
//!
//! The reviewer's prose follows a line convention —
//! `- [tag] path:line: message (severity)` — which this module parses back
//! into structured issues so the PM can gate merges on blockers.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentRunner, RunResult, Task};

/// Severity of a review issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Must be fixed before merge.
    Blocker,
    /// Should be fixed before merge.
    Major,
    /// Worth fixing, does not gate the merge.
    Minor,
    /// Style preference.
    Nit,
}

impl IssueSeverity {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "blocker" => Some(Self::Blocker),
            "major" => Some(Self::Major),
            "minor" => Some(Self::Minor),
            "nit" => Some(Self::Nit),
            _ => None,
        }
    }
}

/// One structured issue parsed from review prose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Problem class, e.g. `bug`, `security`, `style`.
    pub tag: String,
    /// File the issue points at.
    pub file: String,
    /// 1-based line, when given.
    pub line: Option<u32>,
    /// The reviewer's message.
    pub message: String,
    /// Parsed severity; unlabeled issues default to `major`.
    pub severity: IssueSeverity,
}

fn issue_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?m)^\s*[-*]\s*\[(\w+)\]\s+([A-Za-z0-9_./-]+?)(?::(\d+))?:\s+(.+?)(?:\s*\((blocker|major|minor|nit)\))?\s*$",
        )
        .expect("valid pattern")
    })
}

/// Parse every issue line out of review prose.
#[must_use]
pub fn parse_issues(text: &str) -> Vec<Issue> {
    issue_pattern()
        .captures_iter(text)
        .map(|caps| Issue {
            tag: caps[1].to_ascii_lowercase(),
            file: caps[2].to_owned(),
            line: caps.get(3).and_then(|m| m.as_str().parse().ok()),
            message: caps[4].trim().to_owned(),
            severity: caps
                .get(5)
                .and_then(|m| IssueSeverity::parse(m.as_str()))
                .unwrap_or(IssueSeverity::Major),
        })
        .collect()
}

/// The reviewer role runner with a bounded round counter.
#[derive(Debug)]
pub struct ReviewerRunner {
    runner: AgentRunner,
    max_rounds: usize,
    current_round: usize,
}

impl ReviewerRunner {
    /// Default cap on review rounds per thread.
    pub const DEFAULT_MAX_ROUNDS: usize = 3;

    /// Wrap an agent runner with the default round cap.
    #[must_use]
    pub fn new(runner: AgentRunner) -> Self {
        Self::with_max_rounds(runner, Self::DEFAULT_MAX_ROUNDS)
    }

    /// Wrap an agent runner with an explicit round cap.
    #[must_use]
    pub fn with_max_rounds(runner: AgentRunner, max_rounds: usize) -> Self {
        Self {
            runner,
            max_rounds,
            current_round: 0,
        }
    }

    /// Whether another round is allowed.
    #[must_use]
    pub const fn can_review(&self) -> bool {
        self.current_round < self.max_rounds
    }

    /// Rounds consumed so far.
    #[must_use]
    pub const fn current_round(&self) -> usize {
        self.current_round
    }

    /// Review a diff. Consumes one round; callers should check
    /// [`can_review`](Self::can_review) first.
    pub async fn review(
        &mut self,
        cancel: &CancellationToken,
        diff: &str,
        channel: &str,
        thread: &str,
    ) -> (RunResult, Vec<Issue>) {
        self.current_round += 1;
        let text = format!(
            "Review round {} of {}. Examine this diff and report issues, one \
             per line, as '- [tag] path:line: message (severity)'.\n\n```diff\n{diff}\n```",
            self.current_round, self.max_rounds
        );
        let result = self
            .runner
            .run(cancel, &Task::new(text, channel, thread))
            .await;
        let issues = parse_issues(&result.response);
        (result, issues)
    }

    /// The blockers among a set of issues.
    #[must_use]
    pub fn blockers(issues: &[Issue]) -> Vec<&Issue> {
        issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Blocker)
            .collect()
    }
}
