//! The coder runner: plan intake and sandbox validation.
//!
//! Plans reference files as `path:line`. Before a plan reaches the loop the
//! coder derives those references and validates every path against the
//! worktree sandbox; shell commands embedded in plans are screened for
//! known-dangerous constructs.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentRunner, RunResult, Task};
use crate::error::{Error, Result};

/// A `path:line` reference derived from a plan or a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Repo-relative path.
    pub path: String,
    /// 1-based line, when the reference carried one.
    pub line: Option<u32>,
}

fn file_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)([A-Za-z0-9_./-]+\.[A-Za-z0-9_]+)(?::(\d+))?").expect("valid pattern")
    })
}

/// Shell fragments the coder refuses to touch. Substring match against a
/// lowercased command line.
static DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "rm -rf *",
    ":(){",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    "chmod -r 777 /",
    "sudo ",
    "curl | sh",
    "| sh",
    "| bash",
    "wget -o- |",
    "git push --force origin main",
    "git push --force origin master",
];

/// Extract every `path:line` (or bare path) reference from a plan body.
#[must_use]
pub fn derive_file_refs(plan: &str) -> Vec<FileRef> {
    let mut refs = Vec::new();
    for caps in file_ref_pattern().captures_iter(plan) {
        let path = caps[1].to_owned();
        let line = caps.get(2).and_then(|m| m.as_str().parse().ok());
        let candidate = FileRef { path, line };
        if !refs.contains(&candidate) {
            refs.push(candidate);
        }
    }
    refs
}

/// The coder role runner, sandboxed to one worktree.
#[derive(Debug)]
pub struct CoderRunner {
    runner: AgentRunner,
    worktree: PathBuf,
}

impl CoderRunner {
    /// Wrap an agent runner; `worktree` is the only directory the coder may
    /// reference.
    #[must_use]
    pub fn new(runner: AgentRunner, worktree: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            worktree: worktree.into(),
        }
    }

    /// Validate a path from a plan against the sandbox: no `..` traversal,
    /// and absolute paths must stay inside the worktree.
    pub fn validate_path(&self, raw: &str) -> Result<()> {
        let path = Path::new(raw);
        if path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::validation(format!(
                "path '{raw}' escapes the worktree via '..'"
            )));
        }
        if path.is_absolute() && !path.starts_with(&self.worktree) {
            return Err(Error::validation(format!(
                "absolute path '{raw}' is outside the worktree"
            )));
        }
        Ok(())
    }

    /// Screen a shell command for known-dangerous constructs, including
    /// pipe-to-shell.
    pub fn validate_command(command: &str) -> Result<()> {
        let lowered = command.to_ascii_lowercase();
        for pattern in DANGEROUS_PATTERNS {
            if lowered.contains(pattern) {
                return Err(Error::validation(format!(
                    "command rejected: contains '{pattern}'"
                )));
            }
        }
        Ok(())
    }

    /// Validate a whole plan body: every derived file reference must pass
    /// the sandbox. Returns the derived references.
    pub fn validate_plan(&self, plan: &str) -> Result<Vec<FileRef>> {
        let refs = derive_file_refs(plan);
        for file_ref in &refs {
            self.validate_path(&file_ref.path)?;
        }
        Ok(refs)
    }

    /// Run the loop over an approved plan.
    pub async fn implement(
        &self,
        cancel: &CancellationToken,
        plan: &str,
        channel: &str,
        thread: &str,
    ) -> Result<RunResult> {
        let refs = self.validate_plan(plan)?;
        let ref_lines = if refs.is_empty() {
            String::new()
        } else {
            let listed: Vec<String> = refs
                .iter()
                .map(|r| match r.line {
                    Some(line) => format!("{}:{line}", r.path),
                    None => r.path.clone(),
                })
                .collect();
            format!("\n\nFiles referenced by the plan:\n{}", listed.join("\n"))
        };
        let text = format!("Implement this plan:\n\n{plan}{ref_lines}");
        Ok(self
            .runner
            .run(cancel, &Task::new(text, channel, thread))
            .await)
    }
}
