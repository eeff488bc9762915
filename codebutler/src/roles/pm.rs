//! The product manager runner: request classification and planning.
//!
//! Classification happens twice. A deterministic keyword pass runs first
//! and its hint is handed to the loop; the LLM makes the final call. The
//! complexity classifier is purely deterministic and maps to a model
//! recommendation so cheap requests stay on cheap models.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentRunner, RunResult, Task};
use crate::error::Result;

/// The workflows a request can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    /// Build a new feature.
    Implement,
    /// Fix a defect.
    Bugfix,
    /// Answer without changing the repo.
    Question,
    /// Restructure without behavior change.
    Refactor,
    /// Explore an idea before committing to it.
    Discover,
    /// Onboard onto an unfamiliar codebase.
    Learn,
}

impl WorkflowKind {
    /// The keyword token for this workflow.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Implement => "implement",
            Self::Bugfix => "bugfix",
            Self::Question => "question",
            Self::Refactor => "refactor",
            Self::Discover => "discover",
            Self::Learn => "learn",
        }
    }
}

impl FromStr for WorkflowKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "implement" => Ok(Self::Implement),
            "bugfix" => Ok(Self::Bugfix),
            "question" => Ok(Self::Question),
            "refactor" => Ok(Self::Refactor),
            "discover" => Ok(Self::Discover),
            "learn" => Ok(Self::Learn),
            other => Err(crate::error::Error::validation(format!(
                "unknown workflow '{other}'"
            ))),
        }
    }
}

/// Keyword groups scanned by the deterministic preclassifier, in priority
/// order: the first group with a hit wins.
static WORKFLOW_KEYWORDS: &[(WorkflowKind, &[&str])] = &[
    (WorkflowKind::Bugfix, &["bug", "fix", "broken", "crash", "regression", "error"]),
    (WorkflowKind::Refactor, &["refactor", "clean up", "cleanup", "restructure", "rename"]),
    (WorkflowKind::Learn, &["learn", "onboard", "study the codebase"]),
    (WorkflowKind::Discover, &["discover", "explore", "investigate", "spike", "prototype"]),
    (WorkflowKind::Implement, &["implement", "add", "build", "create", "support", "feature"]),
    (WorkflowKind::Question, &["question", "how", "what", "why", "where", "explain", "?"]),
];

/// An optional trigger that routes matching requests to a named skill
/// before normal workflow classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillTrigger {
    /// Substring that activates the skill.
    pub keyword: String,
    /// Name of the skill to run.
    pub skill: String,
}

/// Result of the deterministic pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preclassification {
    /// The workflow hinted at by keywords, if any.
    pub workflow: Option<WorkflowKind>,
    /// A matched skill trigger, if any.
    pub skill: Option<String>,
}

/// How much work a request looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// A single focused change or a direct answer.
    Simple,
    /// A few coordinated changes.
    Medium,
    /// Cross-cutting work over many files or subsystems.
    Complex,
}

impl Complexity {
    /// Model recommendation for this complexity class.
    #[must_use]
    pub const fn recommended_model(&self) -> &'static str {
        match self {
            Self::Simple => "anthropic/claude-haiku-4.5",
            Self::Medium => "anthropic/claude-sonnet-4.5",
            Self::Complex => "anthropic/claude-opus-4.5",
        }
    }
}

/// Markers that push a request toward higher complexity.
static COMPLEX_MARKERS: &[&str] = &[
    "across",
    "migrate",
    "migration",
    "redesign",
    "rewrite",
    "all the",
    "every",
    "architecture",
    "breaking change",
];

static MEDIUM_MARKERS: &[&str] = &["and", "then", "also", "refactor", "tests", "endpoint"];

/// The PM role runner.
#[derive(Debug)]
pub struct PmRunner {
    runner: AgentRunner,
    skill_triggers: Vec<SkillTrigger>,
}

impl PmRunner {
    /// Wrap an agent runner configured with the PM prompt.
    #[must_use]
    pub fn new(runner: AgentRunner) -> Self {
        Self {
            runner,
            skill_triggers: Vec::new(),
        }
    }

    /// Install skill triggers checked during preclassification.
    #[must_use]
    pub fn with_skill_triggers(mut self, triggers: Vec<SkillTrigger>) -> Self {
        self.skill_triggers = triggers;
        self
    }

    /// Deterministic keyword pass over the raw request.
    #[must_use]
    pub fn preclassify(&self, text: &str) -> Preclassification {
        let lowered = text.to_ascii_lowercase();
        let skill = self
            .skill_triggers
            .iter()
            .find(|t| lowered.contains(&t.keyword.to_ascii_lowercase()))
            .map(|t| t.skill.clone());
        let workflow = WORKFLOW_KEYWORDS
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
            .map(|(kind, _)| *kind);
        Preclassification { workflow, skill }
    }

    /// Deterministic complexity estimate over free text.
    #[must_use]
    pub fn classify_complexity(text: &str) -> Complexity {
        let lowered = text.to_ascii_lowercase();
        let complex_hits = COMPLEX_MARKERS
            .iter()
            .filter(|m| lowered.contains(*m))
            .count();
        let medium_hits = MEDIUM_MARKERS
            .iter()
            .filter(|m| lowered.contains(*m))
            .count();

        if complex_hits >= 1 || lowered.len() > 600 {
            Complexity::Complex
        } else if medium_hits >= 2 || lowered.len() > 200 {
            Complexity::Medium
        } else {
            Complexity::Simple
        }
    }

    /// Classify a request: keyword hint first, then the loop makes the
    /// final call. Falls back to the hint (or `Question`) when the LLM's
    /// answer does not name a workflow.
    pub async fn classify(
        &self,
        cancel: &CancellationToken,
        request: &str,
        channel: &str,
        thread: &str,
    ) -> (RunResult, WorkflowKind) {
        let hint = self.preclassify(request);
        let hint_line = hint
            .workflow
            .map(|w| format!("A keyword scan suggests this is '{}'.", w.as_str()))
            .unwrap_or_default();
        let text = format!(
            "Classify this request into exactly one workflow (implement, bugfix, \
             question, refactor, discover, learn). {hint_line}\n\nRequest:\n{request}"
        );
        let result = self
            .runner
            .run(cancel, &Task::new(text, channel, thread))
            .await;

        let decided = result
            .response
            .lines()
            .next()
            .and_then(|line| line.trim().parse::<WorkflowKind>().ok())
            .or(hint.workflow)
            .unwrap_or(WorkflowKind::Question);
        (result, decided)
    }

    /// Turn a numbered plan into roadmap items, remapping the plan's local
    /// step numbers onto the roadmap's numbering. Returns the assigned item
    /// numbers, in step order.
    pub fn extend_roadmap(
        roadmap: &mut crate::roadmap::Roadmap,
        plan: &str,
    ) -> crate::error::Result<Vec<u32>> {
        let steps = parse_plan_steps(plan);
        let mut assigned: std::collections::HashMap<u32, u32> = std::collections::HashMap::new();
        let mut numbers = Vec::with_capacity(steps.len());
        for step in steps {
            let deps: Vec<u32> = step
                .depends_on
                .iter()
                .filter_map(|plan_number| assigned.get(plan_number).copied())
                .collect();
            let number = roadmap.add_item(step.title, deps, step.acceptance)?;
            assigned.insert(step.number, number);
            numbers.push(number);
        }
        Ok(numbers)
    }

    /// Produce a plan for a classified request.
    pub async fn plan(
        &self,
        cancel: &CancellationToken,
        request: &str,
        workflow: WorkflowKind,
        channel: &str,
        thread: &str,
    ) -> RunResult {
        let text = format!(
            "Workflow: {}. Produce a numbered plan with acceptance criteria for \
             this request, small enough that each step is independently \
             verifiable.\n\nRequest:\n{request}",
            workflow.as_str()
        );
        self.runner
            .run(cancel, &Task::new(text, channel, thread))
            .await
    }
}

/// One step of a numbered plan as the PM writes them:
/// `1. Title (depends on: 2, 3)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    /// Plan-local step number.
    pub number: u32,
    /// Step title.
    pub title: String,
    /// Plan-local numbers this step depends on.
    pub depends_on: Vec<u32>,
    /// Acceptance text; empty when the plan gives none.
    pub acceptance: String,
}

fn plan_step_pattern() -> &'static regex::Regex {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"(?m)^\s*(\d+)\.\s+(.+?)(?:\s*\(depends on:\s*([\d,\s]+|—)\))?\s*$")
            .expect("valid pattern")
    })
}

/// Parse the numbered steps out of a PM plan.
#[must_use]
pub fn parse_plan_steps(plan: &str) -> Vec<PlanStep> {
    plan_step_pattern()
        .captures_iter(plan)
        .filter_map(|caps| {
            let number: u32 = caps[1].parse().ok()?;
            let depends_on = caps
                .get(3)
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .filter_map(|part| part.trim().parse().ok())
                        .collect()
                })
                .unwrap_or_default();
            Some(PlanStep {
                number,
                title: caps[2].trim().to_owned(),
                depends_on,
                acceptance: String::new(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::providers::mock::{MockExecutor, MockProvider};
    use crate::roles::{Role, prompts};
    use std::sync::Arc;

    fn pm(provider: MockProvider) -> PmRunner {
        let config = AgentConfig::new(Role::Pm, "mock-model", prompts::PM_SYSTEM_PROMPT);
        PmRunner::new(AgentRunner::new(
            config,
            Arc::new(provider),
            Arc::new(MockExecutor::empty()),
        ))
    }

    #[test]
    fn keyword_preclassification() {
        let pm = pm(MockProvider::with_texts(vec![]));
        assert_eq!(
            pm.preclassify("please fix the crash on startup").workflow,
            Some(WorkflowKind::Bugfix)
        );
        assert_eq!(
            pm.preclassify("implement dark mode").workflow,
            Some(WorkflowKind::Implement)
        );
        assert_eq!(
            pm.preclassify("why does the daemon restart?").workflow,
            Some(WorkflowKind::Question)
        );
        assert_eq!(pm.preclassify("ship it").workflow, None);
    }

    #[test]
    fn skill_triggers_fire_on_substring() {
        let pm = pm(MockProvider::with_texts(vec![])).with_skill_triggers(vec![SkillTrigger {
            keyword: "release notes".to_owned(),
            skill: "changelog".to_owned(),
        }]);
        let hit = pm.preclassify("draft the Release Notes for 2.0");
        assert_eq!(hit.skill.as_deref(), Some("changelog"));
    }

    #[test]
    fn complexity_buckets() {
        assert_eq!(
            PmRunner::classify_complexity("fix typo in readme"),
            Complexity::Simple
        );
        assert_eq!(
            PmRunner::classify_complexity(
                "add the endpoint and then wire the tests for pagination"
            ),
            Complexity::Medium
        );
        assert_eq!(
            PmRunner::classify_complexity("migrate every handler to the new router"),
            Complexity::Complex
        );
        assert!(Complexity::Simple.recommended_model().contains("haiku"));
        assert!(Complexity::Complex.recommended_model().contains("opus"));
    }

    #[tokio::test]
    async fn llm_answer_wins_over_hint() {
        let pm = pm(MockProvider::with_texts(vec!["refactor\nbecause it moves code"]));
        let cancel = CancellationToken::new();
        let (result, workflow) = pm
            .classify(&cancel, "fix the module layout", "chan", "t1")
            .await;
        assert!(result.is_success());
        assert_eq!(workflow, WorkflowKind::Refactor);
    }

    #[test]
    fn plan_steps_parse_with_dependencies() {
        let plan = "\
Here is the plan:

1. Define the session schema
2. Implement the login endpoint (depends on: 1)
3. Implement logout (depends on: 1, 2)

That should cover it.";
        let steps = parse_plan_steps(plan);
        assert_eq!(steps.len(), 3);
        assert!(steps[0].depends_on.is_empty());
        assert_eq!(steps[1].depends_on, vec![1]);
        assert_eq!(steps[2].depends_on, vec![1, 2]);
    }

    #[test]
    fn extend_roadmap_remaps_step_numbers() {
        let mut roadmap = crate::roadmap::Roadmap::new("proj");
        roadmap
            .add_item("existing work", vec![], "already planned")
            .expect("add");

        let plan = "1. New base step\n2. Builds on it (depends on: 1)";
        let numbers = PmRunner::extend_roadmap(&mut roadmap, plan).expect("extend");
        assert_eq!(numbers, vec![2, 3]);

        let second = roadmap.item(3).expect("item");
        assert_eq!(second.depends_on, vec![2]);
        assert!(!crate::roadmap::DependencyGraph::new(&roadmap).has_cycle());
    }

    #[tokio::test]
    async fn hint_used_when_llm_is_vague() {
        let pm = pm(MockProvider::with_texts(vec!["hard to say, it depends"]));
        let cancel = CancellationToken::new();
        let (_, workflow) = pm
            .classify(&cancel, "fix the crash in parser", "chan", "t1")
            .await;
        assert_eq!(workflow, WorkflowKind::Bugfix);
    }
}
