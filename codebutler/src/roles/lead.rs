//! The lead runner: retrospectives, knowledge synthesis, and dispute calls.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentRunner, RunResult, Task};

/// What a retrospective proposal is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalKind {
    /// How the team works.
    Process,
    /// Tools or automation.
    Tooling,
    /// Agent prompt changes.
    Prompt,
    /// New or reordered roadmap items.
    Roadmap,
}

impl ProposalKind {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "process" => Some(Self::Process),
            "tooling" => Some(Self::Tooling),
            "prompt" => Some(Self::Prompt),
            "roadmap" => Some(Self::Roadmap),
            _ => None,
        }
    }
}

/// One retrospective proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// What the proposal is about.
    pub kind: ProposalKind,
    /// The proposal text.
    pub text: String,
}

fn proposal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^\s*[-*]\s*\[(process|tooling|prompt|roadmap)\]\s+(.+?)\s*$")
            .expect("valid pattern")
    })
}

/// Parse `- [kind] proposal` lines from retrospective prose.
#[must_use]
pub fn parse_proposals(text: &str) -> Vec<Proposal> {
    proposal_pattern()
        .captures_iter(text)
        .filter_map(|caps| {
            ProposalKind::parse(&caps[1]).map(|kind| Proposal {
                kind,
                text: caps[2].to_owned(),
            })
        })
        .collect()
}

/// The lead role runner.
#[derive(Debug)]
pub struct LeadRunner {
    runner: AgentRunner,
}

impl LeadRunner {
    /// Wrap an agent runner configured with the lead prompt.
    #[must_use]
    pub fn new(runner: AgentRunner) -> Self {
        Self { runner }
    }

    /// Run a retrospective over a finished thread.
    pub async fn retrospective(
        &self,
        cancel: &CancellationToken,
        thread_summary: &str,
        channel: &str,
        thread: &str,
    ) -> (RunResult, Vec<Proposal>) {
        let text = format!(
            "Run a retrospective over this thread. What went well, what \
             didn't, and what should change? Make proposals as '- [kind] \
             proposal' lines.\n\nThread summary:\n{thread_summary}"
        );
        let result = self
            .runner
            .run(cancel, &Task::new(text, channel, thread))
            .await;
        let proposals = parse_proposals(&result.response);
        (result, proposals)
    }

    /// Synthesize the learn workflow's findings into one knowledge document.
    pub async fn synthesize(
        &self,
        cancel: &CancellationToken,
        project_map: &str,
        findings: &[String],
        channel: &str,
        thread: &str,
    ) -> RunResult {
        let text = format!(
            "Synthesize a single knowledge document for this project from the \
             map and the explorers' findings. Organize it so a new agent can \
             start working from it alone.\n\nProject map:\n{project_map}\n\n\
             Findings:\n{}",
            findings.join("\n\n---\n\n")
        );
        self.runner
            .run(cancel, &Task::new(text, channel, thread))
            .await
    }

    /// Settle a dispute between two agents.
    pub async fn decide_dispute(
        &self,
        cancel: &CancellationToken,
        dispute: &str,
        channel: &str,
        thread: &str,
    ) -> RunResult {
        let text = format!(
            "Two agents disagree. Decide, state the decision in one sentence \
             first, then justify briefly.\n\nDispute:\n{dispute}"
        );
        self.runner
            .run(cancel, &Task::new(text, channel, thread))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::providers::mock::{MockExecutor, MockProvider};
    use crate::roles::{Role, prompts};
    use std::sync::Arc;

    const RETRO: &str = "\
The thread shipped but review took three rounds.

- [process] require a self-review checklist before requesting review
- [prompt] tell the coder to run the linter before summarizing
- [unknown] this line should be ignored
- [roadmap] split oversized item 7 into two items";

    #[test]
    fn parses_known_proposal_kinds() {
        let proposals = parse_proposals(RETRO);
        assert_eq!(proposals.len(), 3);
        assert_eq!(proposals[0].kind, ProposalKind::Process);
        assert_eq!(proposals[1].kind, ProposalKind::Prompt);
        assert_eq!(proposals[2].kind, ProposalKind::Roadmap);
        assert!(proposals[2].text.contains("item 7"));
    }

    #[tokio::test]
    async fn retrospective_round_trip() {
        let config = AgentConfig::new(Role::Lead, "mock-model", prompts::LEAD_SYSTEM_PROMPT);
        let runner = AgentRunner::new(
            config,
            Arc::new(MockProvider::with_texts(vec![RETRO])),
            Arc::new(MockExecutor::empty()),
        );
        let lead = LeadRunner::new(runner);
        let cancel = CancellationToken::new();

        let (result, proposals) = lead
            .retrospective(&cancel, "thread went fine", "chan", "t1")
            .await;
        assert!(result.is_success());
        assert_eq!(proposals.len(), 3);
    }
}
