//! Thread and daily cost ledgers with limit enforcement.
//!
//! Every LLM call is recorded against the owning thread and against the
//! current calendar day. Crossing the per-thread limit pauses the thread;
//! crossing the per-day limit marks the day exhausted. Both are reported via
//! [`Error::BudgetExceeded`] — the ledger is already updated when the error
//! is returned, so callers decide whether to stop.
//!
//! Time is taken from an injectable [`Clock`] so rollover behavior is
//! deterministic under test.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BudgetScope, Error, Result};
use crate::usage::TokenUsage;

/// Time source for the tracker.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock pinned to the given instant.
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Move the clock.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Per-million-token prices for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    /// USD per million input tokens.
    pub input_per_mtok: f64,
    /// USD per million output tokens.
    pub output_per_mtok: f64,
}

impl ModelPrice {
    const fn new(input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            input_per_mtok,
            output_per_mtok,
        }
    }

    /// Cost of the given usage at this price.
    #[must_use]
    pub fn cost(&self, usage: TokenUsage) -> f64 {
        (usage.prompt_tokens as f64) / 1e6 * self.input_per_mtok
            + (usage.completion_tokens as f64) / 1e6 * self.output_per_mtok
    }
}

/// Approximate prices for models the runtime commonly routes to. Unknown
/// models fall back to [`DEFAULT_PRICE`]; the ledger is an approximation,
/// not a billing system.
static MODEL_PRICES: &[(&str, ModelPrice)] = &[
    ("claude-opus", ModelPrice::new(15.0, 75.0)),
    ("claude-sonnet", ModelPrice::new(3.0, 15.0)),
    ("claude-haiku", ModelPrice::new(0.8, 4.0)),
    ("gpt-5", ModelPrice::new(1.25, 10.0)),
    ("gpt-4o", ModelPrice::new(2.5, 10.0)),
    ("gemini-2.5-pro", ModelPrice::new(1.25, 10.0)),
    ("gemini-2.5-flash", ModelPrice::new(0.3, 2.5)),
    ("deepseek", ModelPrice::new(0.3, 1.2)),
];

/// Fallback price for models not in the table.
pub const DEFAULT_PRICE: ModelPrice = ModelPrice::new(3.0, 15.0);

/// Look up the price for a model id by substring match.
#[must_use]
pub fn price_for(model: &str) -> ModelPrice {
    MODEL_PRICES
        .iter()
        .find(|(needle, _)| model.contains(needle))
        .map_or(DEFAULT_PRICE, |(_, price)| *price)
}

/// One recorded LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEntry {
    /// When the call was recorded.
    pub ts: DateTime<Utc>,
    /// The agent role that made the call.
    pub agent: String,
    /// Model id.
    pub model: String,
    /// Token usage.
    pub tokens: TokenUsage,
    /// Computed cost.
    pub cost_usd: f64,
}

/// Ledger for a single thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadBudget {
    /// Thread identifier.
    pub thread_id: String,
    /// All recorded calls, in order.
    pub entries: Vec<UsageEntry>,
    /// Accumulated cost.
    pub total_cost_usd: f64,
    /// Accumulated total tokens.
    pub total_tokens: u64,
    /// The limit in effect when the budget was created.
    pub limit_usd: f64,
    /// Set when a record crossed the limit; cleared by resume.
    pub paused: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl ThreadBudget {
    fn new(thread_id: &str, limit_usd: f64, now: DateTime<Utc>) -> Self {
        Self {
            thread_id: thread_id.to_owned(),
            entries: Vec::new(),
            total_cost_usd: 0.0,
            total_tokens: 0,
            limit_usd,
            paused: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Ledger for a single calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyBudget {
    /// The day, in the tracker clock's timezone (UTC).
    pub date: NaiveDate,
    /// All recorded calls, in order.
    pub entries: Vec<UsageEntry>,
    /// Accumulated cost.
    pub total_cost_usd: f64,
    /// Accumulated total tokens.
    pub total_tokens: u64,
    /// Set when a record crossed the daily limit; resets only by date change.
    pub exhausted: bool,
}

impl DailyBudget {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            entries: Vec::new(),
            total_cost_usd: 0.0,
            total_tokens: 0,
            exhausted: false,
        }
    }
}

/// Budget limits. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetConfig {
    /// Per-thread spending limit in USD.
    #[serde(default)]
    pub per_thread_usd: f64,
    /// Per-day spending limit in USD.
    #[serde(default)]
    pub per_day_usd: f64,
}

#[derive(Default)]
struct LedgerState {
    threads: HashMap<String, ThreadBudget>,
    daily: HashMap<NaiveDate, DailyBudget>,
}

/// Thread + daily cost tracker.
///
/// All reads and writes go through one mutex; every critical section is
/// short. Persistence is per-thread JSON with the same temp-file-rename
/// contract as the conversation store.
pub struct BudgetTracker {
    config: BudgetConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<LedgerState>,
}

impl fmt::Debug for BudgetTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetTracker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BudgetTracker {
    /// Create a tracker on the system clock.
    #[must_use]
    pub fn new(config: BudgetConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a tracker with an explicit clock.
    #[must_use]
    pub fn with_clock(config: BudgetConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Record one LLM call against `thread` and today.
    ///
    /// Returns the computed cost, or [`Error::BudgetExceeded`] when a limit
    /// was crossed. The ledger is updated either way; when both limits trip
    /// in the same call the scope with the lower limit is reported.
    pub fn record(&self, thread: &str, agent: &str, model: &str, tokens: TokenUsage) -> Result<f64> {
        let now = self.clock.now();
        let cost = price_for(model).cost(tokens);
        let entry = UsageEntry {
            ts: now,
            agent: agent.to_owned(),
            model: model.to_owned(),
            tokens,
            cost_usd: cost,
        };

        let mut state = self.state.lock();

        let thread_budget = state
            .threads
            .entry(thread.to_owned())
            .or_insert_with(|| ThreadBudget::new(thread, self.config.per_thread_usd, now));
        thread_budget.entries.push(entry.clone());
        thread_budget.total_cost_usd += cost;
        thread_budget.total_tokens += tokens.total_tokens;
        thread_budget.updated_at = now;

        let thread_limit = self.config.per_thread_usd;
        let thread_tripped = thread_limit > 0.0 && thread_budget.total_cost_usd > thread_limit;
        if thread_tripped {
            thread_budget.paused = true;
        }
        let thread_spent = thread_budget.total_cost_usd;

        let today = now.date_naive();
        let daily = state
            .daily
            .entry(today)
            .or_insert_with(|| DailyBudget::new(today));
        daily.entries.push(entry);
        daily.total_cost_usd += cost;
        daily.total_tokens += tokens.total_tokens;

        let day_limit = self.config.per_day_usd;
        let day_tripped = day_limit > 0.0 && daily.total_cost_usd > day_limit;
        if day_tripped {
            daily.exhausted = true;
        }
        let day_spent = daily.total_cost_usd;

        drop(state);

        match (thread_tripped, day_tripped) {
            (false, false) => Ok(cost),
            (true, false) => Err(Error::BudgetExceeded {
                scope: BudgetScope::Thread,
                spent_usd: thread_spent,
                limit_usd: thread_limit,
            }),
            (false, true) => Err(Error::BudgetExceeded {
                scope: BudgetScope::Day,
                spent_usd: day_spent,
                limit_usd: day_limit,
            }),
            (true, true) => {
                // The lower limit trips first arithmetically; report it.
                if day_limit <= thread_limit {
                    Err(Error::BudgetExceeded {
                        scope: BudgetScope::Day,
                        spent_usd: day_spent,
                        limit_usd: day_limit,
                    })
                } else {
                    Err(Error::BudgetExceeded {
                        scope: BudgetScope::Thread,
                        spent_usd: thread_spent,
                        limit_usd: thread_limit,
                    })
                }
            }
        }
    }

    /// Remaining budget and paused flag for a thread. Unlimited budgets
    /// report `f64::INFINITY` remaining.
    #[must_use]
    pub fn check_thread(&self, thread: &str) -> (f64, bool) {
        let state = self.state.lock();
        let spent = state
            .threads
            .get(thread)
            .map_or(0.0, |b| b.total_cost_usd);
        let paused = state.threads.get(thread).is_some_and(|b| b.paused);
        let remaining = if self.config.per_thread_usd > 0.0 {
            (self.config.per_thread_usd - spent).max(0.0)
        } else {
            f64::INFINITY
        };
        (remaining, paused)
    }

    /// Remaining daily budget and exhausted flag for today.
    #[must_use]
    pub fn check_daily(&self) -> (f64, bool) {
        let today = self.clock.now().date_naive();
        let state = self.state.lock();
        let (spent, exhausted) = state
            .daily
            .get(&today)
            .map_or((0.0, false), |d| (d.total_cost_usd, d.exhausted));
        let remaining = if self.config.per_day_usd > 0.0 {
            (self.config.per_day_usd - spent).max(0.0)
        } else {
            f64::INFINITY
        };
        (remaining, exhausted)
    }

    /// Total recorded cost for a thread.
    #[must_use]
    pub fn thread_cost(&self, thread: &str) -> f64 {
        self.state
            .lock()
            .threads
            .get(thread)
            .map_or(0.0, |b| b.total_cost_usd)
    }

    /// Total recorded cost for today.
    #[must_use]
    pub fn daily_cost(&self) -> f64 {
        let today = self.clock.now().date_naive();
        self.state
            .lock()
            .daily
            .get(&today)
            .map_or(0.0, |d| d.total_cost_usd)
    }

    /// Clear a thread's paused flag. Totals are untouched, and the daily
    /// exhausted flag is deliberately not cleared — that resets only when
    /// the date changes.
    pub fn resume_thread(&self, thread: &str) {
        if let Some(budget) = self.state.lock().threads.get_mut(thread) {
            budget.paused = false;
            debug!(thread, "thread budget resumed");
        }
    }

    /// Zero out a thread's ledger. An explicit operator action.
    pub fn reset_thread(&self, thread: &str) {
        let now = self.clock.now();
        if let Some(budget) = self.state.lock().threads.get_mut(thread) {
            budget.entries.clear();
            budget.total_cost_usd = 0.0;
            budget.total_tokens = 0;
            budget.paused = false;
            budget.updated_at = now;
        }
    }

    /// Render a one-line cost summary for a thread.
    #[must_use]
    pub fn thread_summary(&self, thread: &str) -> String {
        let state = self.state.lock();
        match state.threads.get(thread) {
            Some(budget) => {
                let status = if budget.paused {
                    " — paused — awaiting approval"
                } else {
                    ""
                };
                let limit = if budget.limit_usd > 0.0 {
                    format!(" of {:.2} USD", budget.limit_usd)
                } else {
                    String::new()
                };
                format!(
                    "{}: {:.4} USD{} across {} calls ({} tokens){}",
                    thread,
                    budget.total_cost_usd,
                    limit,
                    budget.entries.len(),
                    budget.total_tokens,
                    status
                )
            }
            None => format!("{thread}: no usage recorded"),
        }
    }

    fn budget_path(data_dir: &Path, thread: &str) -> PathBuf {
        data_dir.join("budgets").join(format!("{thread}.json"))
    }

    /// Persist one thread's ledger to `<data_dir>/budgets/<thread>.json`
    /// with a temp-file rename.
    pub async fn save_thread(&self, data_dir: &Path, thread: &str) -> Result<()> {
        let snapshot = self
            .state
            .lock()
            .threads
            .get(thread)
            .cloned()
            .ok_or_else(|| Error::validation(format!("no budget for thread '{thread}'")))?;

        let path = Self::budget_path(data_dir, thread);
        let display = path.display().to_string();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::store(&display, e.to_string()))?;
        }
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| Error::store(&display, e.to_string()))?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| Error::store(&display, e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::store(&display, e.to_string()))?;
        Ok(())
    }

    /// Load one thread's ledger from disk, replacing any in-memory state
    /// for that thread. Missing files are not an error.
    pub async fn load_thread(&self, data_dir: &Path, thread: &str) -> Result<bool> {
        let path = Self::budget_path(data_dir, thread);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::store(path.display().to_string(), e.to_string())),
        };
        let budget: ThreadBudget = serde_json::from_slice(&bytes)
            .map_err(|e| Error::store(path.display().to_string(), e.to_string()))?;
        self.state
            .lock()
            .threads
            .insert(thread.to_owned(), budget);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tracker(per_thread: f64, per_day: f64) -> (BudgetTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        ));
        let config = BudgetConfig {
            per_thread_usd: per_thread,
            per_day_usd: per_day,
        };
        (
            BudgetTracker::with_clock(config, Arc::clone(&clock) as Arc<dyn Clock>),
            clock,
        )
    }

    #[test]
    fn records_accumulate_on_thread_and_day() {
        let (tracker, _clock) = tracker(0.0, 0.0);
        tracker
            .record("t1", "coder", "claude-sonnet-4", TokenUsage::new(1_000_000, 0))
            .expect("record");
        tracker
            .record("t1", "coder", "claude-sonnet-4", TokenUsage::new(0, 1_000_000))
            .expect("record");
        // 3.00 input + 15.00 output at sonnet prices.
        assert!((tracker.thread_cost("t1") - 18.0).abs() < 1e-9);
        assert!((tracker.daily_cost() - 18.0).abs() < 1e-9);
    }

    #[test]
    fn opus_call_trips_thread_limit() {
        let (tracker, _clock) = tracker(0.001, 0.0);
        let err = tracker
            .record("t1", "coder", "claude-opus-4", TokenUsage::new(10_000, 5_000))
            .unwrap_err();
        assert_eq!(err.budget_scope(), Some(BudgetScope::Thread));

        let (_, paused) = tracker.check_thread("t1");
        assert!(paused);

        tracker.resume_thread("t1");
        let (_, paused) = tracker.check_thread("t1");
        assert!(!paused);
        // Totals survive the resume.
        assert!(tracker.thread_cost("t1") > 0.5);
    }

    #[test]
    fn day_scope_reported_when_day_limit_is_lower() {
        let (tracker, _clock) = tracker(10.0, 0.001);
        let err = tracker
            .record("t1", "pm", "claude-opus-4", TokenUsage::new(10_000, 5_000))
            .unwrap_err();
        assert_eq!(err.budget_scope(), Some(BudgetScope::Day));

        let (_, exhausted) = tracker.check_daily();
        assert!(exhausted);
        // Resume only touches the thread flag.
        tracker.resume_thread("t1");
        let (_, exhausted) = tracker.check_daily();
        assert!(exhausted);
    }

    #[test]
    fn both_tripped_reports_lower_limit() {
        let (tracker, _clock) = tracker(0.002, 0.001);
        let err = tracker
            .record("t1", "pm", "claude-opus-4", TokenUsage::new(10_000, 5_000))
            .unwrap_err();
        assert_eq!(err.budget_scope(), Some(BudgetScope::Day));

        let (tracker, _clock) = tracker_pair_thread_lower();
        let err = tracker
            .record("t1", "pm", "claude-opus-4", TokenUsage::new(10_000, 5_000))
            .unwrap_err();
        assert_eq!(err.budget_scope(), Some(BudgetScope::Thread));
    }

    fn tracker_pair_thread_lower() -> (BudgetTracker, Arc<ManualClock>) {
        tracker(0.001, 0.002)
    }

    #[test]
    fn zero_limit_means_unlimited() {
        let (tracker, _clock) = tracker(0.0, 0.0);
        tracker
            .record("t1", "pm", "claude-opus-4", TokenUsage::new(10_000_000, 1_000_000))
            .expect("unlimited");
        let (remaining, paused) = tracker.check_thread("t1");
        assert!(remaining.is_infinite());
        assert!(!paused);
    }

    #[test]
    fn daily_rollover_resets_exhaustion() {
        let (tracker, clock) = tracker(0.0, 0.001);
        assert!(
            tracker
                .record("t1", "pm", "claude-opus-4", TokenUsage::new(10_000, 5_000))
                .is_err()
        );
        let (_, exhausted) = tracker.check_daily();
        assert!(exhausted);

        clock.set(Utc.with_ymd_and_hms(2026, 3, 2, 0, 30, 0).unwrap());
        let (remaining, exhausted) = tracker.check_daily();
        assert!(!exhausted);
        assert!(remaining > 0.0);
        assert!((tracker.daily_cost() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_model_uses_default_price() {
        assert_eq!(price_for("mystery-model-9000"), DEFAULT_PRICE);
        assert_eq!(
            price_for("anthropic/claude-opus-4.5"),
            ModelPrice::new(15.0, 75.0)
        );
    }

    #[test]
    fn paused_summary_mentions_awaiting_approval() {
        let (tracker, _clock) = tracker(0.001, 0.0);
        let _ = tracker.record("t1", "pm", "claude-opus-4", TokenUsage::new(10_000, 5_000));
        let summary = tracker.thread_summary("t1");
        assert!(summary.contains("paused — awaiting approval"));
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tracker, _clock) = tracker(0.0, 0.0);
        tracker
            .record("t1", "coder", "claude-sonnet-4", TokenUsage::new(100, 50))
            .expect("record");
        tracker.save_thread(dir.path(), "t1").await.expect("save");

        let (fresh, _clock) = tracker_fresh();
        assert!(fresh.load_thread(dir.path(), "t1").await.expect("load"));
        assert!((fresh.thread_cost("t1") - tracker.thread_cost("t1")).abs() < 1e-12);
        assert!(!fresh.load_thread(dir.path(), "t2").await.expect("load"));
    }

    fn tracker_fresh() -> (BudgetTracker, Arc<ManualClock>) {
        tracker(0.0, 0.0)
    }
}
