//! Engine configuration.
//!
//! Every section is optional in the TOML source; missing values fall back to
//! the defaults below.
//!
//! ```toml
//! entry_fetch_limit = 500
//!
//! [vector]
//! similarity_threshold = 0.75
//! max_results = 8
//!
//! [state]
//! max_conversations = 2000
//!
//! [logging]
//! mode = "inline"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::budget::BudgetConfig;
use crate::errors::ConfigError;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum entries loaded per activation call.
    pub entry_fetch_limit: usize,
    /// Collection holding knowledge entries.
    pub entries_collection: String,
    /// Collection receiving activation log rows.
    pub activation_log_collection: String,
    pub vector: VectorConfig,
    pub state: StateConfig,
    pub logging: LoggingConfig,
    pub budget: BudgetSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entry_fetch_limit: 1000,
            entries_collection: "knowledge".to_string(),
            activation_log_collection: "knowledge_activation_logs".to_string(),
            vector: VectorConfig::default(),
            state: StateConfig::default(),
            logging: LoggingConfig::default(),
            budget: BudgetSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from TOML source.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entry_fetch_limit == 0 {
            return Err(ConfigError::Invalid(
                "entry_fetch_limit must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.vector.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "vector.similarity_threshold must be within 0.0..=1.0, got {}",
                self.vector.similarity_threshold
            )));
        }
        if self.state.max_conversations == 0 {
            return Err(ConfigError::Invalid(
                "state.max_conversations must be greater than zero".to_string(),
            ));
        }
        if self.budget.defaults.budget_percentage > 100 {
            return Err(ConfigError::Invalid(format!(
                "budget.defaults.budget_percentage must be at most 100, got {}",
                self.budget.defaults.budget_percentage
            )));
        }
        Ok(())
    }
}

/// Vector path settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub enabled: bool,
    /// Threshold used when no candidate entry sets a lower one.
    pub similarity_threshold: f64,
    pub max_results: usize,
    /// Number of most recent messages forming the query text.
    pub query_window: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.7,
            max_results: 10,
            query_window: 2,
        }
    }
}

/// Per-conversation state retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Conversations kept before the least recently used one is evicted.
    pub max_conversations: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            max_conversations: 10_000,
        }
    }
}

/// How activation log rows are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogMode {
    /// Spawned after the call returns.
    #[default]
    Background,
    /// Awaited before the call returns. Failures are still swallowed.
    Inline,
}

/// Activation log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub mode: LogMode,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: LogMode::Background,
        }
    }
}

/// Budget settings shared by every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    /// Add the per-entry formatting overhead to estimated token costs.
    pub include_formatting_overhead: bool,
    /// Budget used when a caller does not supply one.
    pub defaults: BudgetConfig,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            include_formatting_overhead: true,
            defaults: BudgetConfig::default(),
        }
    }
}
