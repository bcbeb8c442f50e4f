//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (the Buff session cookie) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub puller: PullerConfig,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    #[serde(default)]
    pub steam: SteamConfig,
    #[serde(default)]
    pub buff: BuffConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullerConfig {
    /// Seconds to sleep between full fetch cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Small pause between per-item steps, to avoid bursting both
    /// marketplaces back-to-back.
    #[serde(default = "default_step_pause_ms")]
    pub step_pause_ms: u64,
    /// Specific item ids to track. Empty means every item in the database.
    #[serde(default)]
    pub items: Vec<i64>,
}

impl Default for PullerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            step_pause_ms: default_step_pause_ms(),
            items: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitsConfig {
    #[serde(default = "RateLimitConfig::steam_default")]
    pub steam: RateLimitConfig,
    #[serde(default = "RateLimitConfig::buff_default")]
    pub buff: RateLimitConfig,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            steam: RateLimitConfig::steam_default(),
            buff: RateLimitConfig::buff_default(),
        }
    }
}

/// Per-source request budget and retry behaviour.
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests within any rolling 60-second window.
    pub requests_per_minute: u32,
    /// Base for exponential backoff: sleep `base^attempt` seconds.
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,
    /// Attempts per logical call before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl RateLimitConfig {
    fn steam_default() -> Self {
        Self {
            requests_per_minute: 10,
            backoff_base: default_backoff_base(),
            max_retries: default_max_retries(),
        }
    }

    fn buff_default() -> Self {
        Self {
            requests_per_minute: 20,
            backoff_base: default_backoff_base(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SteamConfig {
    /// Steam app id (730 = CS2).
    #[serde(default = "default_app_id")]
    pub app_id: u32,
    /// Steam wallet currency id (3 = EUR).
    #[serde(default = "default_currency_id")]
    pub currency_id: u32,
}

impl Default for SteamConfig {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
            currency_id: default_currency_id(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuffConfig {
    /// Game tag in Buff query strings.
    #[serde(default = "default_game")]
    pub game: String,
    /// Env var holding the session cookie. The cookie improves result
    /// completeness but search and order listing work without it.
    #[serde(default = "default_cookie_env")]
    pub cookie_env: String,
}

impl Default for BuffConfig {
    fn default() -> Self {
        Self {
            game: default_game(),
            cookie_env: default_cookie_env(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    /// Sell-side transaction cost (Steam takes ~15%).
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,
    /// Probability a listing at the observed bid actually fills.
    #[serde(default = "default_execution_probability")]
    pub execution_probability: f64,
    /// Risk aversion coefficient applied to the VaR penalty.
    #[serde(default = "default_risk_aversion")]
    pub risk_aversion: f64,
    /// Minimum acceptable PnL for a candidate.
    #[serde(default = "default_min_pnl")]
    pub min_pnl: f64,
    /// Minimum acceptable probability of positive PnL after holding.
    #[serde(default = "default_min_prob_positive")]
    pub min_prob_positive: f64,
    /// Forced holding period in days.
    #[serde(default = "default_hold_days")]
    pub hold_days: u32,
    /// Monte Carlo simulation count.
    #[serde(default = "default_n_simulations")]
    pub n_simulations: usize,
    /// Expected daily return (0 for short horizons).
    #[serde(default)]
    pub drift: f64,
    /// History window fed into volatility estimation.
    #[serde(default = "default_history_window_days")]
    pub history_window_days: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            fee_rate: default_fee_rate(),
            execution_probability: default_execution_probability(),
            risk_aversion: default_risk_aversion(),
            min_pnl: default_min_pnl(),
            min_prob_positive: default_min_prob_positive(),
            hold_days: default_hold_days(),
            n_simulations: default_n_simulations(),
            drift: 0.0,
            history_window_days: default_history_window_days(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_interval_secs() -> u64 {
    300
}
fn default_step_pause_ms() -> u64 {
    1000
}
fn default_backoff_base() -> f64 {
    2.0
}
fn default_max_retries() -> u32 {
    3
}
fn default_app_id() -> u32 {
    730
}
fn default_currency_id() -> u32 {
    3
}
fn default_game() -> String {
    "csgo".to_string()
}
fn default_cookie_env() -> String {
    "BUFF_COOKIE".to_string()
}
fn default_fee_rate() -> f64 {
    0.15
}
fn default_execution_probability() -> f64 {
    0.6
}
fn default_risk_aversion() -> f64 {
    0.5
}
fn default_min_pnl() -> f64 {
    0.5
}
fn default_min_prob_positive() -> f64 {
    0.6
}
fn default_hold_days() -> u32 {
    7
}
fn default_n_simulations() -> usize {
    10_000
}
fn default_history_window_days() -> u32 {
    7
}
fn default_db_path() -> String {
    "db/skinflint.sqlite".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file. A missing file yields the
    /// built-in defaults rather than an error, so a fresh checkout runs.
    pub fn load(path: &str) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: AppConfig = toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file: {path}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path, "Config file not found, using defaults");
                Ok(toml::from_str("")
                    .with_context(|| "Failed to build default configuration")?)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read config file: {path}")),
        }
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
