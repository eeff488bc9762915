//! Topological scheduler for roadmap items.
//!
//! Each tick rebuilds the dependency graph (statuses may have changed
//! elsewhere), launches as many ready items as the concurrency cap allows,
//! and waits for one worker to finish. A completed item immediately makes
//! its dependents eligible on the next tick; a failed item becomes blocked
//! and everything downstream simply never becomes ready.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};

use super::{DependencyGraph, Item, ItemStatus, Roadmap};

/// Executes one roadmap item and returns the branch the work landed on.
#[async_trait]
pub trait ItemWorker: Send + Sync {
    /// Run the item to completion.
    async fn run(&self, cancel: &CancellationToken, item: &Item) -> Result<String>;
}

/// One progress report, emitted after every item completes or fails.
#[derive(Debug, Clone)]
pub struct ProgressReport {
    /// The item that just finished.
    pub item: u32,
    /// Its new status.
    pub status: ItemStatus,
    /// The branch recorded on success.
    pub branch: Option<String>,
    /// The failure reason on error.
    pub error: Option<String>,
    /// Items done so far.
    pub done: usize,
    /// Total items in the roadmap.
    pub total: usize,
}

/// Receives progress reports.
pub trait StatusReporter: Send + Sync {
    /// Called after each item completes or fails.
    fn report(&self, report: &ProgressReport);
}

/// Drives an [`ItemWorker`] over a roadmap, respecting the dependency DAG
/// and a concurrency cap.
pub struct Orchestrator {
    worker: Arc<dyn ItemWorker>,
    reporter: Option<Arc<dyn StatusReporter>>,
    max_concurrent: usize,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator. `max_concurrent` is clamped to at least 1.
    #[must_use]
    pub fn new(worker: Arc<dyn ItemWorker>, max_concurrent: usize) -> Self {
        Self {
            worker,
            reporter: None,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Attach a progress reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Run until no item is ready and no worker is active.
    ///
    /// Statuses are mutated in place: `in_progress` before launch, `done`
    /// plus the returned branch on success, `blocked` plus the error string
    /// on failure.
    pub async fn run(&self, cancel: &CancellationToken, roadmap: &mut Roadmap) -> Result<()> {
        let mut active: HashSet<u32> = HashSet::new();
        let mut tasks: JoinSet<(u32, Result<String>)> = JoinSet::new();

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let graph = DependencyGraph::new(roadmap);
            let ready: Vec<u32> = graph
                .unblocked()
                .into_iter()
                .filter(|number| !active.contains(number))
                .collect();

            let slots = self.max_concurrent.saturating_sub(active.len());
            for number in ready.into_iter().take(slots) {
                roadmap.set_status(number, ItemStatus::InProgress)?;
                active.insert(number);
                let item = roadmap
                    .item(number)
                    .ok_or(super::RoadmapParseError::NoSuchItem { number })?
                    .clone();
                info!(item = number, title = %item.title, "launching roadmap item");
                let worker = Arc::clone(&self.worker);
                let cancel = cancel.clone();
                tasks.spawn(async move {
                    let outcome = worker.run(&cancel, &item).await;
                    (item.number, outcome)
                });
            }

            if active.is_empty() {
                break;
            }

            let joined = tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };
            let (number, outcome) =
                joined.map_err(|e| Error::validation(format!("item worker panicked: {e}")))?;
            active.remove(&number);

            let (status, branch, error) = match outcome {
                Ok(branch) => {
                    roadmap.set_status(number, ItemStatus::Done)?;
                    roadmap.set_branch(number, &branch)?;
                    info!(item = number, branch = %branch, "roadmap item done");
                    (ItemStatus::Done, Some(branch), None)
                }
                Err(e) => {
                    let reason = e.to_string();
                    roadmap.set_status(number, ItemStatus::Blocked)?;
                    roadmap.set_blocked_by(number, reason.clone())?;
                    warn!(item = number, error = %reason, "roadmap item blocked");
                    (ItemStatus::Blocked, None, Some(reason))
                }
            };

            if let Some(reporter) = &self.reporter {
                let done = roadmap
                    .items
                    .iter()
                    .filter(|i| i.status == ItemStatus::Done)
                    .count();
                reporter.report(&ProgressReport {
                    item: number,
                    status,
                    branch,
                    error,
                    done,
                    total: roadmap.items.len(),
                });
            }
        }

        Ok(())
    }
}
