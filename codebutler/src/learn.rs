//! The learn workflow: three-phase onboarding onto an unfamiliar codebase.
//!
//! Map (PM alone) → Explore (technical explorers in parallel, each given
//! the map) → Synthesize (lead folds everything into one knowledge
//! document). The map and the synthesis are hard dependencies; a partially
//! failed explore phase is reported but not fatal.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentRunner, RunState, Task};
use crate::error::{Error, Result};
use crate::roles::prompts::LEARN_MAP_PROMPT;
use crate::roles::{LeadRunner, Role};

/// Whether onboarding is needed: there is code, and nothing has been
/// learned about it yet.
#[must_use]
pub fn needs_learn(has_code_files: bool, existing_knowledge: &str) -> bool {
    has_code_files && existing_knowledge.trim().is_empty()
}

/// One explorer's contribution to the explore phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerFinding {
    /// The exploring role.
    pub role: Role,
    /// The finding text, when the explorer succeeded.
    pub finding: Option<String>,
    /// The failure description otherwise.
    pub error: Option<String>,
}

/// Result of a full learn workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnReport {
    /// The PM's project map.
    pub map: String,
    /// Per-explorer outcomes, in explorer order.
    pub findings: Vec<ExplorerFinding>,
    /// The lead's synthesized knowledge document.
    pub knowledge: String,
}

/// The three-phase onboarding scheduler.
pub struct LearnWorkflow {
    pm: AgentRunner,
    explorers: Vec<(Role, AgentRunner)>,
    lead: LeadRunner,
}

impl std::fmt::Debug for LearnWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearnWorkflow")
            .field("explorers", &self.explorers.len())
            .finish_non_exhaustive()
    }
}

impl LearnWorkflow {
    /// Assemble the workflow from its phase runners.
    #[must_use]
    pub fn new(pm: AgentRunner, explorers: Vec<(Role, AgentRunner)>, lead: LeadRunner) -> Self {
        Self {
            pm,
            explorers,
            lead,
        }
    }

    /// Run all three phases.
    ///
    /// Returns an error when the map or the synthesis fails; explorer
    /// failures are recorded in the report instead.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        channel: &str,
        thread: &str,
    ) -> Result<LearnReport> {
        // Phase 1: map. Everything downstream depends on it.
        let map_result = self
            .pm
            .run(cancel, &Task::new(LEARN_MAP_PROMPT, channel, thread))
            .await;
        if map_result.state != RunState::Completed || map_result.response.is_empty() {
            return Err(Error::validation(format!(
                "project mapping failed: {}",
                map_result
                    .error
                    .unwrap_or_else(|| "no map produced".to_owned())
            )));
        }
        let map = map_result.response;

        // Phase 2: explore in parallel. Failures stay in their slot.
        let futures = self.explorers.iter().map(|(role, runner)| {
            let map = map.clone();
            let explorer_thread = format!("{thread}-{role}");
            async move {
                let text = format!(
                    "Here is the PM's map of the project:\n\n{map}\n\nExplore \
                     the repository from the perspective of your role and \
                     report what a {role} needs to know to work here."
                );
                let result = runner
                    .run(cancel, &Task::new(text, channel, explorer_thread))
                    .await;
                if result.state == RunState::Completed && !result.response.is_empty() {
                    ExplorerFinding {
                        role: *role,
                        finding: Some(result.response),
                        error: None,
                    }
                } else {
                    ExplorerFinding {
                        role: *role,
                        finding: None,
                        error: Some(
                            result
                                .error
                                .unwrap_or_else(|| "explorer produced no findings".to_owned()),
                        ),
                    }
                }
            }
        });
        let findings = futures::future::join_all(futures).await;

        // Phase 3: synthesize from the successful findings.
        let successful: Vec<String> = findings
            .iter()
            .filter_map(|f| {
                f.finding
                    .as_ref()
                    .map(|text| format!("[{}]\n{text}", f.role))
            })
            .collect();
        let synthesis = self
            .lead
            .synthesize(cancel, &map, &successful, channel, thread)
            .await;
        if synthesis.state != RunState::Completed || synthesis.response.is_empty() {
            return Err(Error::validation(format!(
                "knowledge synthesis failed: {}",
                synthesis
                    .error
                    .unwrap_or_else(|| "no document produced".to_owned())
            )));
        }

        Ok(LearnReport {
            map,
            findings,
            knowledge: synthesis.response,
        })
    }
}
