//! The researcher runner: question in, verifiable findings out.

use tokio_util::sync::CancellationToken;

use crate::agent::{AgentRunner, RunResult, Task};

/// The researcher role runner.
#[derive(Debug)]
pub struct ResearcherRunner {
    runner: AgentRunner,
}

impl ResearcherRunner {
    /// Wrap an agent runner configured with the researcher prompt.
    #[must_use]
    pub fn new(runner: AgentRunner) -> Self {
        Self { runner }
    }

    /// Investigate a question against the repository.
    pub async fn research(
        &self,
        cancel: &CancellationToken,
        query: &str,
        channel: &str,
        thread: &str,
    ) -> (RunResult, Vec<String>) {
        let text = format!(
            "Research this question against the repository. List findings as \
             bullets with file references, then conclude.\n\nQuestion:\n{query}"
        );
        let result = self
            .runner
            .run(cancel, &Task::new(text, channel, thread))
            .await;
        let findings = parse_findings(&result.response);
        (result, findings)
    }
}

/// Pull the bulleted findings out of researcher prose.
#[must_use]
pub fn parse_findings(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix("* "))
                .map(|rest| rest.trim().to_owned())
        })
        .filter(|finding| !finding.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::providers::mock::{MockExecutor, MockProvider};
    use crate::roles::{Role, prompts};
    use std::sync::Arc;

    #[test]
    fn extracts_bullets_only() {
        let findings = parse_findings(
            "Summary first.\n\n- config is loaded in src/config.rs\n* retries live in src/net.rs:40\nConclusion.",
        );
        assert_eq!(
            findings,
            vec![
                "config is loaded in src/config.rs".to_owned(),
                "retries live in src/net.rs:40".to_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn research_round_trip() {
        let config = AgentConfig::new(
            Role::Researcher,
            "mock-model",
            prompts::RESEARCHER_SYSTEM_PROMPT,
        );
        let runner = AgentRunner::new(
            config,
            Arc::new(MockProvider::with_texts(vec![
                "- the daemon restarts in src/main.rs:12\n\nThat is the whole story.",
            ])),
            Arc::new(MockExecutor::empty()),
        );
        let researcher = ResearcherRunner::new(runner);
        let cancel = CancellationToken::new();

        let (result, findings) = researcher
            .research(&cancel, "why does the daemon restart?", "chan", "t1")
            .await;
        assert!(result.is_success());
        assert_eq!(findings.len(), 1);
        assert!(findings[0].contains("src/main.rs:12"));
    }
}
