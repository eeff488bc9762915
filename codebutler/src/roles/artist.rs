//! The artist runner: UX proposals with parseable sections.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentRunner, RunResult, Task};

/// A UX proposal split into its `## ` sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UxProposal {
    /// Prose before the first section header.
    pub summary: String,
    /// `(header, body)` pairs in document order.
    pub sections: Vec<(String, String)>,
}

impl UxProposal {
    /// Body of a section by header name, case-insensitive.
    #[must_use]
    pub fn section(&self, header: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(h, _)| h.eq_ignore_ascii_case(header))
            .map(|(_, body)| body.as_str())
    }
}

/// Split proposal markdown on `## ` headers.
#[must_use]
pub fn parse_proposal(text: &str) -> UxProposal {
    let mut proposal = UxProposal::default();
    let mut current: Option<(String, String)> = None;

    for line in text.lines() {
        if let Some(header) = line.strip_prefix("## ") {
            if let Some((h, body)) = current.take() {
                proposal.sections.push((h, body.trim().to_owned()));
            }
            current = Some((header.trim().to_owned(), String::new()));
        } else {
            match current.as_mut() {
                Some((_, body)) => {
                    body.push_str(line);
                    body.push('\n');
                }
                None => {
                    proposal.summary.push_str(line);
                    proposal.summary.push('\n');
                }
            }
        }
    }
    if let Some((h, body)) = current.take() {
        proposal.sections.push((h, body.trim().to_owned()));
    }
    proposal.summary = proposal.summary.trim().to_owned();
    proposal
}

/// The artist role runner.
#[derive(Debug)]
pub struct ArtistRunner {
    runner: AgentRunner,
}

impl ArtistRunner {
    /// Wrap an agent runner configured with the artist prompt.
    #[must_use]
    pub fn new(runner: AgentRunner) -> Self {
        Self { runner }
    }

    /// Produce a UX proposal for a feature request.
    pub async fn design(
        &self,
        cancel: &CancellationToken,
        request: &str,
        channel: &str,
        thread: &str,
    ) -> (RunResult, UxProposal) {
        let text = format!(
            "Propose the user-facing design for this request. Use '## ' \
             section headers.\n\nRequest:\n{request}"
        );
        let result = self
            .runner
            .run(cancel, &Task::new(text, channel, thread))
            .await;
        let proposal = parse_proposal(&result.response);
        (result, proposal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::providers::mock::{MockExecutor, MockProvider};
    use crate::roles::{Role, prompts};
    use std::sync::Arc;

    const PROPOSAL: &str = "\
Dark mode should follow the OS by default.

## Overview
A three-state toggle: system, light, dark.

## Flow
Settings → Appearance → Theme.

## Open questions
Should code blocks keep their own theme?";

    #[test]
    fn splits_summary_and_sections() {
        let proposal = parse_proposal(PROPOSAL);
        assert!(proposal.summary.starts_with("Dark mode"));
        assert_eq!(proposal.sections.len(), 3);
        assert_eq!(
            proposal.section("overview"),
            Some("A three-state toggle: system, light, dark.")
        );
        assert!(proposal.section("nonexistent").is_none());
    }

    #[tokio::test]
    async fn design_round_trip() {
        let config = AgentConfig::new(Role::Artist, "mock-model", prompts::ARTIST_SYSTEM_PROMPT);
        let runner = AgentRunner::new(
            config,
            Arc::new(MockProvider::with_texts(vec![PROPOSAL])),
            Arc::new(MockExecutor::empty()),
        );
        let artist = ArtistRunner::new(runner);
        let cancel = CancellationToken::new();

        let (result, proposal) = artist
            .design(&cancel, "add dark mode", "chan", "t1")
            .await;
        assert!(result.is_success());
        assert_eq!(proposal.sections.len(), 3);
    }
}
