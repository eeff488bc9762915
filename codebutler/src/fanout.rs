//! Parallel one-shot LLM calls across a pool of distinct models.
//!
//! The PM and lead use fan-out to get several independent takes on one
//! question: each thinker gets its own system prompt and model, everyone
//! receives the same user prompt, and all calls run concurrently. A failed
//! slot never cancels its peers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::budget::price_for;
use crate::chat::{ChatProvider, ChatRequest};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::usage::TokenUsage;

/// Output tokens assumed per call in the pre-flight cost estimate.
const ESTIMATED_OUTPUT_TOKENS: u64 = 1000;

/// One participant in a fan-out round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thinker {
    /// Display name used in slot results.
    pub name: String,
    /// System prompt for this thinker.
    pub system_prompt: String,
    /// Model id; must be distinct within a round.
    pub model: String,
}

impl Thinker {
    /// Create a thinker.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            model: model.into(),
        }
    }
}

/// Fan-out policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FanOutConfig {
    /// Models the round is allowed to use. Empty means any.
    #[serde(default, rename = "models")]
    pub model_pool: Vec<String>,
    /// Maximum thinkers per round.
    #[serde(default = "default_max_agents")]
    pub max_agents_per_round: usize,
    /// Soft pre-flight cost ceiling in USD. Zero disables the check.
    #[serde(default)]
    pub max_cost_per_round: f64,
}

fn default_max_agents() -> usize {
    5
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            model_pool: Vec::new(),
            max_agents_per_round: default_max_agents(),
            max_cost_per_round: 0.0,
        }
    }
}

/// Result of one thinker's slot: either a response or an error, always with
/// the slot's wall-clock duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutSlot {
    /// Thinker name.
    pub name: String,
    /// Model used.
    pub model: String,
    /// Response text on success.
    pub response: Option<String>,
    /// Error message on failure.
    pub error: Option<String>,
    /// Token usage on success.
    pub tokens: TokenUsage,
    /// Cost of this slot at the model's price.
    pub cost_usd: f64,
    /// Wall-clock duration of the call.
    pub duration: Duration,
}

impl FanOutSlot {
    /// True when the slot produced a response.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.response.is_some()
    }
}

/// Aggregated result of a fan-out round. Slot order matches thinker order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutReport {
    /// Per-thinker outcomes, in input order.
    pub slots: Vec<FanOutSlot>,
    /// Number of successful slots.
    pub succeeded: usize,
    /// Number of failed slots.
    pub failed: usize,
    /// Total cost across all successful slots.
    pub total_cost_usd: f64,
    /// Longest single slot duration (the round's wall clock).
    pub max_duration: Duration,
}

/// Issues one-shot completions to a set of thinkers concurrently.
pub struct FanOutExecutor {
    provider: Arc<dyn ChatProvider>,
    config: FanOutConfig,
}

impl std::fmt::Debug for FanOutExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FanOutExecutor {
    /// Create an executor over a provider and policy.
    #[must_use]
    pub fn new(provider: Arc<dyn ChatProvider>, config: FanOutConfig) -> Self {
        Self { provider, config }
    }

    /// Validate a round's thinkers against the policy.
    pub fn validate(&self, thinkers: &[Thinker]) -> Result<()> {
        if thinkers.is_empty() {
            return Err(Error::validation("fan-out requires at least one thinker"));
        }
        if thinkers.len() > self.config.max_agents_per_round {
            return Err(Error::validation(format!(
                "{} thinkers exceed the per-round cap of {}",
                thinkers.len(),
                self.config.max_agents_per_round
            )));
        }
        for thinker in thinkers {
            if thinker.name.is_empty() || thinker.system_prompt.is_empty() || thinker.model.is_empty()
            {
                return Err(Error::validation(
                    "every thinker needs a name, a system prompt, and a model",
                ));
            }
            if !self.config.model_pool.is_empty()
                && !self.config.model_pool.contains(&thinker.model)
            {
                return Err(Error::validation(format!(
                    "model '{}' is not in the configured pool",
                    thinker.model
                )));
            }
        }
        for (i, a) in thinkers.iter().enumerate() {
            if thinkers[i + 1..].iter().any(|b| b.model == a.model) {
                return Err(Error::validation(format!(
                    "model '{}' appears more than once in the round",
                    a.model
                )));
            }
        }
        Ok(())
    }

    /// Rough pre-flight cost of a round: prompt length over four as input
    /// tokens, a flat output assumption, priced per model.
    #[must_use]
    pub fn estimate_cost(&self, thinkers: &[Thinker], prompt: &str) -> f64 {
        let input_tokens = (prompt.len() / 4) as u64;
        thinkers
            .iter()
            .map(|t| {
                price_for(&t.model).cost(TokenUsage::new(input_tokens, ESTIMATED_OUTPUT_TOKENS))
            })
            .sum()
    }

    /// Run one fan-out round.
    ///
    /// Validation and the soft cost ceiling are checked up front; after
    /// launch, slot failures are isolated and reported in place.
    pub async fn fan_out(
        &self,
        cancel: &CancellationToken,
        thinkers: &[Thinker],
        prompt: &str,
    ) -> Result<FanOutReport> {
        self.validate(thinkers)?;

        if self.config.max_cost_per_round > 0.0 {
            let estimate = self.estimate_cost(thinkers, prompt);
            if estimate > self.config.max_cost_per_round {
                return Err(Error::validation(format!(
                    "estimated round cost {:.4} USD exceeds the {:.4} USD ceiling",
                    estimate, self.config.max_cost_per_round
                )));
            }
        }

        debug!(thinkers = thinkers.len(), "fan-out round started");
        let futures = thinkers.iter().map(|thinker| {
            let provider = Arc::clone(&self.provider);
            let cancel = cancel.clone();
            async move {
                let started = Instant::now();
                let request = ChatRequest::new(
                    &thinker.model,
                    vec![
                        Message::system(&thinker.system_prompt),
                        Message::user(prompt),
                    ],
                );
                match provider.chat(&cancel, &request).await {
                    Ok(response) => {
                        let tokens = response.usage;
                        FanOutSlot {
                            name: thinker.name.clone(),
                            model: thinker.model.clone(),
                            response: Some(
                                response.text().unwrap_or_default().to_owned(),
                            ),
                            error: None,
                            tokens,
                            cost_usd: price_for(&thinker.model).cost(tokens),
                            duration: started.elapsed(),
                        }
                    }
                    Err(e) => {
                        warn!(thinker = %thinker.name, error = %e, "fan-out slot failed");
                        FanOutSlot {
                            name: thinker.name.clone(),
                            model: thinker.model.clone(),
                            response: None,
                            error: Some(e.to_string()),
                            tokens: TokenUsage::zero(),
                            cost_usd: 0.0,
                            duration: started.elapsed(),
                        }
                    }
                }
            }
        });

        let slots = futures::future::join_all(futures).await;
        let succeeded = slots.iter().filter(|s| s.succeeded()).count();
        let failed = slots.len() - succeeded;
        let total_cost_usd = slots.iter().map(|s| s.cost_usd).sum();
        let max_duration = slots
            .iter()
            .map(|s| s.duration)
            .max()
            .unwrap_or_default();

        Ok(FanOutReport {
            slots,
            succeeded,
            failed,
            total_cost_usd,
            max_duration,
        })
    }
}
