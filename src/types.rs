//! Shared types for the SKINFLINT tracker.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that fetcher, store, risk,
//! and puller modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Marketplace identity. Steam is the sell side (the forced holding period
/// applies to anything bought elsewhere and listed there); Buff is the buy
/// side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Steam,
    Buff,
}

impl Source {
    /// Stable string tag used in the database and in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Steam => "steam",
            Source::Buff => "buff",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steam" => Ok(Source::Steam),
            "buff" => Ok(Source::Buff),
            _ => Err(anyhow::anyhow!("Unknown source: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// A tracked tradable item.
///
/// `market_hash_name` is the globally unique primary identifier (the Steam
/// market hash name). `buff_goods_id` is resolved lazily via Buff search on
/// first contact and cached thereafter.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Item {
    pub item_id: i64,
    pub market_hash_name: String,
    pub buff_goods_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.buff_goods_id {
            Some(id) => write!(f, "#{} {} (buff:{id})", self.item_id, self.market_hash_name),
            None => write!(f, "#{} {} (buff:unresolved)", self.item_id, self.market_hash_name),
        }
    }
}

/// A candidate goods entry returned by Buff search.
#[derive(Debug, Clone)]
pub struct GoodsCandidate {
    pub goods_id: i64,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Quotes (normalized observations)
// ---------------------------------------------------------------------------

/// One normalized read from one marketplace at one instant.
///
/// All price fields are nullable: a malformed field degrades to `None`
/// rather than failing the observation. The raw payload is preserved
/// verbatim for audit and debugging.
#[derive(Debug, Clone)]
pub struct Quote {
    pub source: Source,
    /// Best (highest-sorted) buy-order price.
    pub best_bid: Option<f64>,
    /// Best (lowest-sorted) sell-order price.
    pub best_ask: Option<f64>,
    /// Median traded price, where the source reports one (Steam only).
    pub median_price: Option<f64>,
    /// Traded volume counter, where the source reports one.
    pub volume: Option<i64>,
    /// Order-book depth on the side this quote was taken from.
    pub order_count: Option<i64>,
    /// Unmodified response payload.
    pub raw: serde_json::Value,
    /// HTTP status of the request that produced this quote.
    pub status: u16,
    /// Measured round-trip latency.
    pub latency_ms: i64,
}

impl Quote {
    /// Whether at least one side of the book was observed.
    /// Successful fetches always satisfy this; fetchers convert a quote
    /// with no usable price into a failure instead of returning it.
    pub fn has_price(&self) -> bool {
        self.best_bid.is_some() || self.best_ask.is_some()
    }
}

// ---------------------------------------------------------------------------
// Fetch failures
// ---------------------------------------------------------------------------

/// Why a fetch produced no observation.
#[derive(Debug, Clone, Error)]
pub enum FetchErrorKind {
    /// The transport layer failed (connect, timeout, TLS, body read).
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success HTTP status.
    #[error("HTTP {0}")]
    Status(u16),

    /// The endpoint answered 200 but reported failure in the payload,
    /// or the payload carried nothing usable.
    #[error("marketplace error: {0}")]
    Api(String),

    /// Buff search found no candidate goods for the item name.
    #[error("no goods matched \"{0}\"")]
    Unresolved(String),
}

/// A failed fetch, as a value. Fetchers never let transport errors escape;
/// callers pattern-match on `FetchResult` and treat "no observation" as a
/// first-class outcome.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub kind: FetchErrorKind,
    pub status: Option<u16>,
    pub latency_ms: Option<i64>,
}

impl FetchFailure {
    pub fn transport(err: impl fmt::Display) -> Self {
        Self {
            kind: FetchErrorKind::Transport(err.to_string()),
            status: None,
            latency_ms: None,
        }
    }

    pub fn status(status: u16, latency_ms: i64) -> Self {
        Self {
            kind: FetchErrorKind::Status(status),
            status: Some(status),
            latency_ms: Some(latency_ms),
        }
    }

    pub fn api(msg: impl Into<String>, status: u16, latency_ms: i64) -> Self {
        Self {
            kind: FetchErrorKind::Api(msg.into()),
            status: Some(status),
            latency_ms: Some(latency_ms),
        }
    }

    pub fn unresolved(term: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Unresolved(term.into()),
            status: None,
            latency_ms: None,
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

/// Outcome of one logical fetch: an observation or a failure value.
pub type FetchResult<T> = Result<T, FetchFailure>;

// ---------------------------------------------------------------------------
// Fetch log entries
// ---------------------------------------------------------------------------

/// Audit record of one network attempt, success or failure.
#[derive(Debug, Clone)]
pub struct FetchLogEntry {
    pub source: Source,
    /// Endpoint tag: "priceoverview", "search", "sell_order", "buy_order".
    pub endpoint: &'static str,
    pub status: Option<u16>,
    pub latency_ms: Option<i64>,
    pub success: bool,
    pub error: Option<String>,
    pub item_id: Option<i64>,
}

impl FetchLogEntry {
    /// Log entry for a successful fetch.
    pub fn success(source: Source, endpoint: &'static str, quote: &Quote, item_id: i64) -> Self {
        Self {
            source,
            endpoint,
            status: Some(quote.status),
            latency_ms: Some(quote.latency_ms),
            success: true,
            error: None,
            item_id: Some(item_id),
        }
    }

    /// Log entry for a failed fetch.
    pub fn failure(
        source: Source,
        endpoint: &'static str,
        failure: &FetchFailure,
        item_id: i64,
    ) -> Self {
        Self {
            source,
            endpoint,
            status: failure.status,
            latency_ms: failure.latency_ms,
            success: false,
            error: Some(failure.to_string()),
            item_id: Some(item_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Risk output
// ---------------------------------------------------------------------------

/// Recommended action for a spread opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Skip,
    Monitor,
    Candidate,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Skip => write!(f, "skip"),
            Action::Monitor => write!(f, "monitor"),
            Action::Candidate => write!(f, "candidate"),
        }
    }
}

/// Ephemeral output of the risk engine for one item at one instant.
/// Computed on demand, never persisted.
#[derive(Debug, Clone)]
pub struct RiskAssessment {
    /// Fee-adjusted spread PnL at current quotes (not simulated).
    pub current_pnl: f64,
    /// Fraction of simulated holding-period outcomes with positive PnL.
    pub prob_positive: f64,
    /// Mean of the simulated PnL distribution.
    pub expected_pnl: f64,
    /// 5th percentile of simulated PnL; negative values denote loss.
    pub var_95: f64,
    /// 1st percentile of simulated PnL.
    pub var_99: f64,
    /// Minimum simulated PnL.
    pub worst_case: f64,
    pub action: Action,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
