//! Drive a roadmap through the orchestrator with a stub worker.
//!
//! ```sh
//! cargo run --example roadmap_cascade
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codebutler::prelude::*;
use codebutler::roadmap::{Item, ProgressReport};
use tokio_util::sync::CancellationToken;

const ROADMAP: &str = "\
# Roadmap: demo

## 1. Lay the foundation
- Status: pending
- Depends on: —
- Acceptance criteria: base module compiles

## 2. Left wing
- Status: pending
- Depends on: 1
- Acceptance criteria: feature A works

## 3. Right wing
- Status: pending
- Depends on: 1
- Acceptance criteria: feature B works

## 4. Roof
- Status: pending
- Depends on: 2, 3
- Acceptance criteria: everything integrates
";

struct SleepyWorker;

#[async_trait]
impl ItemWorker for SleepyWorker {
    async fn run(&self, _cancel: &CancellationToken, item: &Item) -> Result<String> {
        println!("  working on {}. {}", item.number, item.title);
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(format!("branch-{}", item.number))
    }
}

struct PrintReporter;

impl StatusReporter for PrintReporter {
    fn report(&self, report: &ProgressReport) {
        println!(
            "  item {} -> {:?} ({}/{} done)",
            report.item, report.status, report.done, report.total
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut roadmap = Roadmap::parse(ROADMAP)?;

    let graph = DependencyGraph::new(&roadmap);
    println!("critical path: {:?}", graph.critical_path());

    let orchestrator =
        Orchestrator::new(Arc::new(SleepyWorker), 2).with_reporter(Arc::new(PrintReporter));
    let cancel = CancellationToken::new();

    println!("running with max_concurrent = 2:");
    orchestrator.run(&cancel, &mut roadmap).await?;

    println!("\nfinal roadmap:\n\n{}", roadmap.format());
    Ok(())
}
