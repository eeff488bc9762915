//! The roadmap: a persistent markdown plan with a dependency DAG.
//!
//! The file lives at `<repo>/.codebutler/roadmap.md` and uses a strict
//! header format so the parser and formatter round-trip exactly:
//!
//! ```markdown
//! # Roadmap: my-project
//!
//! ## 1. Wire up config loading
//! - Status: pending
//! - Depends on: —
//! - Acceptance criteria: config file parsed and validated
//! ```
//!
//! Parsing never panics on malformed input; every failure carries the line
//! it happened on.

pub mod graph;
pub mod orchestrator;

pub use graph::DependencyGraph;
pub use orchestrator::{ItemWorker, Orchestrator, ProgressReport, StatusReporter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a roadmap item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Not started.
    Pending,
    /// A worker is on it.
    InProgress,
    /// Finished and accepted.
    Done,
    /// Failed or waiting on something external.
    Blocked,
}

impl ItemStatus {
    /// The exact token used in the roadmap file.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Blocked => "blocked",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

/// One roadmap item. `number` is a stable, unique key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Unique stable number.
    pub number: u32,
    /// Short title.
    pub title: String,
    /// Lifecycle state.
    pub status: ItemStatus,
    /// Numbers of items this one depends on.
    pub depends_on: Vec<u32>,
    /// Branch the work landed on, once known.
    pub branch: Option<String>,
    /// What "done" means.
    pub acceptance: String,
    /// Why the item is blocked, when it is.
    pub blocked_by: Option<String>,
}

/// Error type for roadmap parsing and mutation.
#[derive(Debug, Error)]
pub enum RoadmapParseError {
    /// The file does not start with a `# Roadmap:` header.
    #[error("missing '# Roadmap:' header")]
    MissingHeader,
    /// An item header is not of the form `## <N>. <title>`.
    #[error("line {line}: malformed item header '{text}'")]
    BadItemHeader {
        /// 1-based line number.
        line: usize,
        /// The offending text.
        text: String,
    },
    /// A field line could not be parsed.
    #[error("line {line}: {message}")]
    BadField {
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        message: String,
    },
    /// Two items share a number.
    #[error("duplicate item number {number}")]
    DuplicateNumber {
        /// The repeated number.
        number: u32,
    },
    /// A dependency references a number that does not exist.
    #[error("item {number} depends on unknown item {dependency}")]
    UnknownDependency {
        /// The dependent item.
        number: u32,
        /// The missing dependency.
        dependency: u32,
    },
    /// The dependency relation has a cycle.
    #[error("dependency cycle involving item {number}")]
    Cycle {
        /// An item on the cycle.
        number: u32,
    },
    /// A mutation referenced a number that does not exist.
    #[error("no item with number {number}")]
    NoSuchItem {
        /// The missing number.
        number: u32,
    },
}

/// A parsed roadmap: title plus ordered items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roadmap {
    /// Project title from the top header.
    pub title: String,
    /// Items in file order.
    pub items: Vec<Item>,
}

impl Roadmap {
    /// Create an empty roadmap.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            items: Vec::new(),
        }
    }

    /// Parse the strict markdown format.
    pub fn parse(text: &str) -> Result<Self, RoadmapParseError> {
        let mut lines = text.lines().enumerate();

        let title = loop {
            match lines.next() {
                Some((_, line)) if line.trim().is_empty() => {}
                Some((_, line)) => {
                    let Some(rest) = line.strip_prefix("# Roadmap:") else {
                        return Err(RoadmapParseError::MissingHeader);
                    };
                    break rest.trim().to_owned();
                }
                None => return Err(RoadmapParseError::MissingHeader),
            }
        };

        let mut roadmap = Self::new(title);
        let mut current: Option<Item> = None;

        for (idx, raw) in lines {
            let line = raw.trim_end();
            let lineno = idx + 1;
            if line.trim().is_empty() {
                continue;
            }

            if let Some(header) = line.strip_prefix("## ") {
                if let Some(item) = current.take() {
                    roadmap.push_parsed(item)?;
                }
                let (number, title) = header.split_once(". ").ok_or_else(|| {
                    RoadmapParseError::BadItemHeader {
                        line: lineno,
                        text: line.to_owned(),
                    }
                })?;
                let number: u32 =
                    number
                        .trim()
                        .parse()
                        .map_err(|_| RoadmapParseError::BadItemHeader {
                            line: lineno,
                            text: line.to_owned(),
                        })?;
                current = Some(Item {
                    number,
                    title: title.trim().to_owned(),
                    status: ItemStatus::Pending,
                    depends_on: Vec::new(),
                    branch: None,
                    acceptance: String::new(),
                    blocked_by: None,
                });
                continue;
            }

            let Some(item) = current.as_mut() else {
                return Err(RoadmapParseError::BadField {
                    line: lineno,
                    message: format!("field outside of any item: '{line}'"),
                });
            };

            if let Some(value) = line.strip_prefix("- Status: ") {
                item.status = ItemStatus::parse(value.trim()).ok_or_else(|| {
                    RoadmapParseError::BadField {
                        line: lineno,
                        message: format!("unknown status '{}'", value.trim()),
                    }
                })?;
            } else if let Some(value) = line.strip_prefix("- Branch: ") {
                let value = value.trim();
                item.branch = (!value.is_empty()).then(|| value.to_owned());
            } else if let Some(value) = line.strip_prefix("- Depends on: ") {
                item.depends_on = parse_dependencies(value.trim(), lineno)?;
            } else if let Some(value) = line.strip_prefix("- Acceptance criteria: ") {
                item.acceptance = value.trim().to_owned();
            } else if let Some(value) = line.strip_prefix("- Blocked by: ") {
                let value = value.trim();
                item.blocked_by = (!value.is_empty()).then(|| value.to_owned());
            } else {
                return Err(RoadmapParseError::BadField {
                    line: lineno,
                    message: format!("unrecognized field '{line}'"),
                });
            }
        }

        if let Some(item) = current.take() {
            roadmap.push_parsed(item)?;
        }

        roadmap.validate_dependencies()?;
        Ok(roadmap)
    }

    fn push_parsed(&mut self, item: Item) -> Result<(), RoadmapParseError> {
        if self.items.iter().any(|i| i.number == item.number) {
            return Err(RoadmapParseError::DuplicateNumber {
                number: item.number,
            });
        }
        self.items.push(item);
        Ok(())
    }

    fn validate_dependencies(&self) -> Result<(), RoadmapParseError> {
        for item in &self.items {
            for dep in &item.depends_on {
                if !self.items.iter().any(|i| i.number == *dep) {
                    return Err(RoadmapParseError::UnknownDependency {
                        number: item.number,
                        dependency: *dep,
                    });
                }
            }
        }
        let graph = DependencyGraph::new(self);
        if let Some(number) = graph.find_cycle() {
            return Err(RoadmapParseError::Cycle { number });
        }
        Ok(())
    }

    /// Render the canonical markdown form. `parse(format(r))` yields `r`.
    #[must_use]
    pub fn format(&self) -> String {
        let mut out = format!("# Roadmap: {}\n", self.title);
        for item in &self.items {
            out.push('\n');
            out.push_str(&format!("## {}. {}\n", item.number, item.title));
            out.push_str(&format!("- Status: {}\n", item.status.as_str()));
            if let Some(branch) = &item.branch {
                out.push_str(&format!("- Branch: {branch}\n"));
            }
            if item.depends_on.is_empty() {
                out.push_str("- Depends on: —\n");
            } else {
                let deps: Vec<String> =
                    item.depends_on.iter().map(ToString::to_string).collect();
                out.push_str(&format!("- Depends on: {}\n", deps.join(", ")));
            }
            out.push_str(&format!("- Acceptance criteria: {}\n", item.acceptance));
            if let Some(reason) = &item.blocked_by {
                out.push_str(&format!("- Blocked by: {reason}\n"));
            }
        }
        out
    }

    /// Look up an item by number.
    #[must_use]
    pub fn item(&self, number: u32) -> Option<&Item> {
        self.items.iter().find(|i| i.number == number)
    }

    fn item_mut(&mut self, number: u32) -> Result<&mut Item, RoadmapParseError> {
        self.items
            .iter_mut()
            .find(|i| i.number == number)
            .ok_or(RoadmapParseError::NoSuchItem { number })
    }

    /// Change an item's status.
    pub fn set_status(
        &mut self,
        number: u32,
        status: ItemStatus,
    ) -> Result<(), RoadmapParseError> {
        self.item_mut(number)?.status = status;
        Ok(())
    }

    /// Record the branch an item's work landed on.
    pub fn set_branch(&mut self, number: u32, branch: &str) -> Result<(), RoadmapParseError> {
        self.item_mut(number)?.branch = Some(branch.to_owned());
        Ok(())
    }

    /// Record why an item is blocked.
    pub fn set_blocked_by(
        &mut self,
        number: u32,
        reason: impl Into<String>,
    ) -> Result<(), RoadmapParseError> {
        self.item_mut(number)?.blocked_by = Some(reason.into());
        Ok(())
    }

    /// Append a new pending item with the next free number.
    pub fn add_item(
        &mut self,
        title: impl Into<String>,
        depends_on: Vec<u32>,
        acceptance: impl Into<String>,
    ) -> Result<u32, RoadmapParseError> {
        let number = self.items.iter().map(|i| i.number).max().unwrap_or(0) + 1;
        for dep in &depends_on {
            if self.item(*dep).is_none() {
                return Err(RoadmapParseError::UnknownDependency {
                    number,
                    dependency: *dep,
                });
            }
        }
        self.items.push(Item {
            number,
            title: title.into(),
            status: ItemStatus::Pending,
            depends_on,
            branch: None,
            acceptance: acceptance.into(),
            blocked_by: None,
        });
        Ok(number)
    }
}

fn parse_dependencies(value: &str, line: usize) -> Result<Vec<u32>, RoadmapParseError> {
    if value == "—" || value == "-" || value.is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| RoadmapParseError::BadField {
                    line,
                    message: format!("bad dependency list entry '{}'", part.trim()),
                })
        })
        .collect()
}
