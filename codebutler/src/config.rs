//! Runtime configuration.
//!
//! Settings come from two TOML files: a global secrets file (API keys,
//! default models) and a per-repo file that overrides it section by
//! section. `${ENV_VAR}` references are substituted when the file is read;
//! unknown variables become empty strings and fail validation like any
//! other missing value. Unknown keys are rejected at load time to catch
//! typos.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::budget::BudgetConfig;
use crate::fanout::FanOutConfig;
use crate::roles::Role;

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error; also raised for unknown keys.
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// A required value is absent (or resolved to empty).
    #[error("missing required config: {0}")]
    MissingField(String),
    /// A present value is unusable.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// OpenRouter credentials: the primary LLM gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenRouterConfig {
    /// API key.
    #[serde(default)]
    pub api_key: String,
}

/// OpenAI credentials for auxiliary services. Optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAiConfig {
    /// API key.
    #[serde(default)]
    pub api_key: String,
}

/// A model assignment: a single id, or a pool for hot-swapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelChoice {
    /// One model.
    Single(String),
    /// A pool; the first entry is the active model.
    Pool(Vec<String>),
}

impl ModelChoice {
    /// The active model id, if the choice is non-empty.
    #[must_use]
    pub fn active(&self) -> Option<&str> {
        match self {
            Self::Single(model) => (!model.is_empty()).then_some(model.as_str()),
            Self::Pool(models) => models.first().map(String::as_str),
        }
    }

    /// Every model in the choice.
    #[must_use]
    pub fn all(&self) -> Vec<&str> {
        match self {
            Self::Single(model) => vec![model.as_str()],
            Self::Pool(models) => models.iter().map(String::as_str).collect(),
        }
    }
}

/// Per-role model assignments, keyed by role name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig(pub HashMap<Role, ModelChoice>);

/// Admission control limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Concurrent active threads. Zero means unlimited.
    #[serde(default = "default_max_threads")]
    pub max_concurrent_threads: usize,
    /// LLM calls per hour across the runtime. Zero means unlimited.
    #[serde(default)]
    pub max_calls_per_hour: u32,
}

fn default_max_threads() -> usize {
    4
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_threads: default_max_threads(),
            max_calls_per_hour: 0,
        }
    }
}

/// Root configuration: the merge of the global secrets file and the
/// per-repo overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// OpenRouter credentials.
    #[serde(default)]
    pub openrouter: Option<OpenRouterConfig>,

    /// OpenAI credentials for auxiliary services.
    #[serde(default)]
    pub openai: Option<OpenAiConfig>,

    /// Per-role model assignments.
    #[serde(default)]
    pub models: Option<ModelsConfig>,

    /// Fan-out policy.
    #[serde(default, alias = "multiModel")]
    pub multi_model: Option<FanOutConfig>,

    /// Admission control.
    #[serde(default)]
    pub limits: Option<LimitsConfig>,

    /// Budget limits. Zero means unlimited.
    #[serde(default)]
    pub budget: Option<BudgetConfig>,
}

impl RuntimeConfig {
    /// Parse a TOML document after `${ENV_VAR}` substitution.
    pub fn from_toml(raw: &str) -> ConfigResult<Self> {
        let substituted = substitute_env(raw, |name| std::env::var(name).ok());
        Ok(toml::from_str(&substituted)?)
    }

    /// Load one config file.
    pub async fn load_from(path: &Path) -> ConfigResult<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        debug!(path = %path.display(), "loaded config file");
        Self::from_toml(&raw)
    }

    /// Load the global secrets file merged with per-repo overrides. Either
    /// file may be absent; values in the repo file win.
    pub async fn load_merged(global: &Path, repo: &Path) -> ConfigResult<Self> {
        let base = if global.exists() {
            Self::load_from(global).await?
        } else {
            info!(path = %global.display(), "no global config, using defaults");
            Self::default()
        };
        let overlay = if repo.exists() {
            Self::load_from(repo).await?
        } else {
            Self::default()
        };
        Ok(base.merged(overlay))
    }

    /// Overlay another config on top of this one, section by section.
    #[must_use]
    pub fn merged(self, overlay: Self) -> Self {
        Self {
            openrouter: overlay.openrouter.or(self.openrouter),
            openai: overlay.openai.or(self.openai),
            models: overlay.models.or(self.models),
            multi_model: overlay.multi_model.or(self.multi_model),
            limits: overlay.limits.or(self.limits),
            budget: overlay.budget.or(self.budget),
        }
    }

    /// Check that required credentials are present after substitution.
    pub fn validate(&self) -> ConfigResult<()> {
        let key = self
            .openrouter
            .as_ref()
            .map(|c| c.api_key.as_str())
            .unwrap_or_default();
        if key.is_empty() {
            return Err(ConfigError::MissingField("openrouter.api_key".to_owned()));
        }
        if let Some(multi) = &self.multi_model
            && multi.max_agents_per_round == 0
        {
            return Err(ConfigError::InvalidValue(
                "multi_model.max_agents_per_round must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    /// The active model for a role, if configured.
    #[must_use]
    pub fn model_for(&self, role: Role) -> Option<&str> {
        self.models
            .as_ref()
            .and_then(|m| m.0.get(&role))
            .and_then(ModelChoice::active)
    }

    /// Fan-out policy, defaulted when absent.
    #[must_use]
    pub fn fanout(&self) -> FanOutConfig {
        self.multi_model.clone().unwrap_or_default()
    }

    /// Admission limits, defaulted when absent.
    #[must_use]
    pub fn limits(&self) -> LimitsConfig {
        self.limits.unwrap_or_default()
    }

    /// Budget limits, defaulted (unlimited) when absent.
    #[must_use]
    pub fn budget(&self) -> BudgetConfig {
        self.budget.unwrap_or_default()
    }
}

/// Replace every `${NAME}` reference using the given lookup. Unknown
/// variables become the empty string.
fn substitute_env(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let pattern = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .expect("env reference pattern is valid");
    pattern
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            lookup(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}
