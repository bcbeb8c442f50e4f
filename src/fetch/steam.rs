//! Steam Community Market integration.
//!
//! Single read-only endpoint: `priceoverview`, queried per item with the
//! app id, wallet currency id, and URL-encoded market hash name. Steam
//! reports the lowest listed ask and a median traded price; it exposes no
//! buy-order data on this endpoint, so `best_bid` is always absent.
//!
//! Rate limit: Steam throttles this endpoint aggressively per IP, so
//! the default budget is a conservative 10 requests/minute.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use tracing::debug;

use super::{build_client, parse_price, parse_volume, send_with_retry, MarketFetcher, RawResponse};
use crate::config::{RateLimitConfig, SteamConfig};
use crate::limiter::{RateLimiter, RetryPolicy};
use crate::types::{FetchFailure, FetchResult, Item, Quote, Source};

const BASE_URL: &str = "https://steamcommunity.com/market/priceoverview/";

/// Endpoint tag recorded in fetch logs.
pub const ENDPOINT: &str = "priceoverview";

/// Steam Community Market client.
pub struct SteamFetcher {
    http: reqwest::Client,
    limiter: RateLimiter,
    retry: RetryPolicy,
    app_id: u32,
    currency_id: u32,
}

impl SteamFetcher {
    pub fn new(steam: &SteamConfig, limits: &RateLimitConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );

        Ok(Self {
            http: build_client(headers)?,
            limiter: RateLimiter::new(limits.requests_per_minute),
            retry: RetryPolicy::from(limits),
            app_id: steam.app_id,
            currency_id: steam.currency_id,
        })
    }

    /// Normalize a priceoverview payload into a `Quote`.
    ///
    /// The lowest listed price becomes the best ask. A payload whose
    /// `success` flag is false, or that yields no parseable price at all,
    /// becomes a failure: a "successful" observation always carries at
    /// least one side of the book.
    fn normalize(raw: RawResponse) -> FetchResult<Quote> {
        let body = raw.body;

        let api_success = body
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !api_success {
            return Err(FetchFailure::api(
                "priceoverview reported success=false",
                raw.status,
                raw.latency_ms,
            ));
        }

        let best_ask = parse_price(body.get("lowest_price").and_then(|v| v.as_str()));
        let median_price = parse_price(body.get("median_price").and_then(|v| v.as_str()));
        let volume = parse_volume(body.get("volume").and_then(|v| v.as_str()));

        if best_ask.is_none() {
            return Err(FetchFailure::api(
                "no parseable price fields in priceoverview response",
                raw.status,
                raw.latency_ms,
            ));
        }

        Ok(Quote {
            source: Source::Steam,
            best_bid: None, // not exposed by this endpoint
            best_ask,
            median_price,
            volume,
            order_count: None,
            raw: body,
            status: raw.status,
            latency_ms: raw.latency_ms,
        })
    }
}

#[async_trait]
impl MarketFetcher for SteamFetcher {
    fn source(&self) -> Source {
        Source::Steam
    }

    async fn fetch_quote(&mut self, item: &Item) -> FetchResult<Quote> {
        let url = format!(
            "{BASE_URL}?appid={}&currency={}&market_hash_name={}",
            self.app_id,
            self.currency_id,
            urlencoding::encode(&item.market_hash_name),
        );
        debug!(item = %item.market_hash_name, "Fetching Steam priceoverview");

        self.limiter.acquire().await;
        let raw = send_with_retry(self.http.get(&url), &self.retry, ENDPOINT).await?;
        Self::normalize(raw)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FetchErrorKind;
    use serde_json::json;

    fn raw(body: serde_json::Value) -> RawResponse {
        RawResponse {
            status: 200,
            latency_ms: 42,
            body,
        }
    }

    #[test]
    fn test_normalize_full_payload() {
        let quote = SteamFetcher::normalize(raw(json!({
            "success": true,
            "lowest_price": "$10.50",
            "volume": "1,234",
            "median_price": "$11.00"
        })))
        .unwrap();

        assert_eq!(quote.source, Source::Steam);
        assert_eq!(quote.best_ask, Some(10.50));
        assert_eq!(quote.best_bid, None);
        assert_eq!(quote.median_price, Some(11.00));
        assert_eq!(quote.volume, Some(1234));
        assert_eq!(quote.status, 200);
        assert_eq!(quote.latency_ms, 42);
        // Raw payload preserved verbatim.
        assert_eq!(quote.raw["lowest_price"], "$10.50");
        assert!(quote.has_price());
    }

    #[test]
    fn test_normalize_api_failure_flag() {
        let result = SteamFetcher::normalize(raw(json!({ "success": false })));
        let failure = result.unwrap_err();
        assert!(matches!(failure.kind, FetchErrorKind::Api(_)));
        assert_eq!(failure.status, Some(200));
    }

    #[test]
    fn test_normalize_malformed_median_degrades() {
        let quote = SteamFetcher::normalize(raw(json!({
            "success": true,
            "lowest_price": "$8.50",
            "median_price": "not-a-price"
        })))
        .unwrap();
        assert_eq!(quote.best_ask, Some(8.50));
        assert_eq!(quote.median_price, None);
        assert_eq!(quote.volume, None);
    }

    #[test]
    fn test_normalize_no_usable_price_is_failure() {
        // success=true but nothing parseable: the bid/ask invariant would
        // be violated, so this is surfaced as a failed fetch.
        let result = SteamFetcher::normalize(raw(json!({
            "success": true,
            "lowest_price": "??",
            "volume": "12"
        })));
        assert!(matches!(
            result.unwrap_err().kind,
            FetchErrorKind::Api(_)
        ));
    }
}
