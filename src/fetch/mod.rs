//! Marketplace integrations.
//!
//! Defines the fetcher capability traits and provides implementations for:
//! - Steam Community Market: single priceoverview endpoint, sell side
//! - Buff: search + sell/buy order listing, buy side
//!
//! Everything a fetcher returns is a value: transport errors and non-success
//! statuses are converted into `FetchFailure` at this boundary and never
//! propagate as panics or `?`-style errors into the orchestrator.

pub mod buff;
pub mod steam;

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tracing::warn;

use crate::limiter::RetryPolicy;
use crate::types::{FetchFailure, FetchResult, GoodsCandidate, Item, Quote, Source};

/// Fixed per-call timeout. In-flight calls are allowed to run to this bound
/// on shutdown rather than being aborted mid-request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Browser-style user agent; both marketplaces answer differently to
/// obvious bot agents.
const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Shared capability of every marketplace: one logical quote query for a
/// tracked item, normalized into a `Quote`.
#[async_trait]
pub trait MarketFetcher: Send {
    /// Which marketplace this fetcher talks to.
    fn source(&self) -> Source;

    /// Issue one logical market query and normalize the response.
    /// Rate limiting and retries happen inside; the returned failure is the
    /// outcome after the last attempt.
    async fn fetch_quote(&mut self, item: &Item) -> FetchResult<Quote>;
}

/// Extra capabilities of an order-book marketplace (Buff): free-text goods
/// search plus separate sell-side and buy-side listings.
#[async_trait]
pub trait OrderBookMarket: Send {
    /// Search goods by name; candidates are ordered by the marketplace's
    /// own relevance sort (sell volume descending).
    async fn search(&mut self, term: &str) -> FetchResult<Vec<GoodsCandidate>>;

    /// Sell-order listing for a resolved goods id (best ask side).
    async fn fetch_asks(&mut self, goods_id: i64) -> FetchResult<Quote>;

    /// Buy-order listing for a resolved goods id (best bid side).
    async fn fetch_bids(&mut self, goods_id: i64) -> FetchResult<Quote>;
}

// ---------------------------------------------------------------------------
// Shared HTTP plumbing
// ---------------------------------------------------------------------------

/// Build a reqwest client with the shared timeout, user agent, and any
/// marketplace-specific default headers.
pub(crate) fn build_client(headers: HeaderMap) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .build()
        .context("Failed to build HTTP client")
}

/// A successful HTTP exchange before marketplace-specific normalization.
pub(crate) struct RawResponse {
    pub status: u16,
    pub latency_ms: i64,
    pub body: serde_json::Value,
}

/// Send a request with bounded exponential-backoff retries.
///
/// A call fails when the transport errors or the status is not success; on
/// failure with attempts remaining we sleep `backoff_base^attempt` seconds
/// and retry. After the final attempt the last failure is returned as a
/// value.
pub(crate) async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
    endpoint: &'static str,
) -> FetchResult<RawResponse> {
    let mut last_failure = FetchFailure::transport("request not attempted");

    for attempt in 0..policy.max_retries {
        let Some(req) = request.try_clone() else {
            return Err(FetchFailure::transport("request not cloneable"));
        };

        let started = Instant::now();
        match req.send().await {
            Ok(resp) => {
                let latency_ms = started.elapsed().as_millis() as i64;
                let status = resp.status().as_u16();
                if resp.status().is_success() {
                    match resp.json::<serde_json::Value>().await {
                        Ok(body) => {
                            return Ok(RawResponse {
                                status,
                                latency_ms,
                                body,
                            })
                        }
                        Err(e) => {
                            warn!(endpoint, error = %e, "Response body was not JSON");
                            last_failure = FetchFailure {
                                kind: crate::types::FetchErrorKind::Transport(e.to_string()),
                                status: Some(status),
                                latency_ms: Some(latency_ms),
                            };
                        }
                    }
                } else {
                    warn!(endpoint, status, attempt, "Non-success response");
                    last_failure = FetchFailure::status(status, latency_ms);
                }
            }
            Err(e) => {
                warn!(endpoint, error = %e, attempt, "Transport error");
                last_failure = FetchFailure::transport(&e);
            }
        }

        if attempt + 1 < policy.max_retries {
            tokio::time::sleep(policy.delay(attempt)).await;
        }
    }

    Err(last_failure)
}

// ---------------------------------------------------------------------------
// Normalization helpers
// ---------------------------------------------------------------------------

/// Parse a marketplace price string into a decimal number.
///
/// Strips known currency symbols (`$`, `€`, `£`) and comma thousands
/// separators. A missing or unparseable field degrades to `None` with a
/// recorded warning; this never fails the surrounding observation.
pub fn parse_price(raw: Option<&str>) -> Option<f64> {
    let raw = raw?;
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ','))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    match cleaned.parse::<f64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(price = raw, "Could not parse price field");
            None
        }
    }
}

/// Parse a volume counter that may carry comma separators ("1,234").
pub fn parse_volume(raw: Option<&str>) -> Option<i64> {
    let cleaned: String = raw?.chars().filter(|c| *c != ',').collect();
    cleaned.trim().parse::<i64>().ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
