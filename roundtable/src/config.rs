//! Dispatcher and roundtable configuration
//!
//! Loaded from TOML, then overridden from the environment. Every field has
//! a default so a partial file (or none at all) is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// How duplicate registrations are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationMode {
    /// Duplicate identity is an error
    #[default]
    Strict,
    /// Duplicate identity is logged and ignored
    Soft,
}

/// Weights of the candidate scoring formula
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Multiplier on the required capability's proficiency
    pub proficiency: f64,
    /// Multiplier on the required capability's success rate
    pub capability_success: f64,
    /// Cap on the response-time penalty (seconds, subtracted 1:1)
    pub latency_cap: f64,
    /// Multiplier on current load
    pub load_penalty: f64,
    /// Multiplier on lifetime success rate
    pub lifetime_success: f64,
    /// Flat bonus for workers with little history
    pub newcomer_bonus: f64,
    /// Lifetime task count below which the newcomer bonus applies
    pub newcomer_threshold: u64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            proficiency: 40.0,
            capability_success: 20.0,
            latency_cap: 10.0,
            load_penalty: 15.0,
            lifetime_success: 15.0,
            newcomer_bonus: 10.0,
            newcomer_threshold: 10,
        }
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub registration_mode: RegistrationMode,
    pub scoring: ScoringWeights,
    /// Smoothing factor for rolling averages
    pub smoothing_alpha: f64,
    /// Number of task results kept in memory
    pub history_capacity: usize,
    /// Heartbeats older than this are reported stale
    pub staleness_window_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            registration_mode: RegistrationMode::Strict,
            scoring: ScoringWeights::default(),
            smoothing_alpha: 0.1,
            history_capacity: 1000,
            staleness_window_secs: 300,
        }
    }
}

impl DispatcherConfig {
    pub fn staleness_window(&self) -> Duration {
        Duration::from_secs(self.staleness_window_secs)
    }
}

/// Roundtable (consensus) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundtableConfig {
    /// Maximum worker calls in flight per round
    pub pool_size: usize,
    /// Per-worker call timeout in milliseconds
    pub timeout_ms: u64,
    /// Fraction of workers that must respond
    pub quorum_ratio: f64,
    /// Voting algorithm name (majority, weighted, borda)
    pub algorithm: String,
    /// Tie-break rule name (confidence, chair, random)
    pub tie_break: String,
    /// Worker whose choice wins a `chair` tie-break
    pub chair: Option<String>,
    /// Seed for the `random` tie-break
    pub random_seed: u64,
    /// Number of final reports kept in the vote ledger
    pub ledger_capacity: usize,
}

impl Default for RoundtableConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            timeout_ms: 30_000,
            quorum_ratio: 0.6,
            algorithm: "majority".to_string(),
            tie_break: "confidence".to_string(),
            chair: None,
            random_seed: 42,
            ledger_capacity: 256,
        }
    }
}

impl RoundtableConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dispatcher: DispatcherConfig,
    pub roundtable: RoundtableConfig,
}

impl Config {
    /// Parse from a TOML string
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let mut config: Config = toml::from_str(&raw)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override selected fields from `ROUNDTABLE_*` environment variables.
    ///
    /// Unparseable values are ignored.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse::<usize>("ROUNDTABLE_POOL_SIZE") {
            self.roundtable.pool_size = v;
        }
        if let Some(v) = env_parse::<u64>("ROUNDTABLE_TIMEOUT_MS") {
            self.roundtable.timeout_ms = v;
        }
        if let Some(v) = env_parse::<f64>("ROUNDTABLE_QUORUM_RATIO") {
            self.roundtable.quorum_ratio = v;
        }
        if let Some(v) = env_parse::<u64>("ROUNDTABLE_SEED") {
            self.roundtable.random_seed = v;
        }
    }

    /// Reject values no component can run with
    pub fn validate(&self) -> ConfigResult<()> {
        let ratio = self.roundtable.quorum_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "quorum_ratio must be in (0, 1], got {ratio}"
            )));
        }
        if self.roundtable.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be > 0".to_string()));
        }
        let alpha = self.dispatcher.smoothing_alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "smoothing_alpha must be in (0, 1], got {alpha}"
            )));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
