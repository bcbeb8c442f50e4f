//! Buff marketplace integration.
//!
//! Three read-only endpoints: goods search (free text → candidate goods
//! ids), sell-order listing (asks, price-sorted ascending), and buy-order
//! listing (bids, price-sorted descending). All three take the game tag and
//! a page number.
//!
//! Auth: a session cookie taken from the environment improves result
//! completeness but search and order listing work without it. The cookie is
//! held behind `secrecy` so it never lands in debug output.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use secrecy::{ExposeSecret, Secret};
use tracing::{debug, warn};

use super::{build_client, send_with_retry, MarketFetcher, OrderBookMarket, RawResponse};
use crate::config::{BuffConfig, RateLimitConfig};
use crate::limiter::{RateLimiter, RetryPolicy};
use crate::types::{FetchFailure, FetchResult, GoodsCandidate, Item, Quote, Source};

const BASE_URL: &str = "https://buff.163.com/api/market/goods";

/// Endpoint tags recorded in fetch logs.
pub const ENDPOINT_SEARCH: &str = "search";
pub const ENDPOINT_SELL: &str = "sell_order";
pub const ENDPOINT_BUY: &str = "buy_order";

/// Which side of the book an order listing belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderSide {
    Sell,
    Buy,
}

/// Buff marketplace client.
pub struct BuffFetcher {
    http: reqwest::Client,
    limiter: RateLimiter,
    retry: RetryPolicy,
    game: String,
    cookie: Option<Secret<String>>,
}

impl BuffFetcher {
    pub fn new(buff: &BuffConfig, limits: &RateLimitConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9,zh-CN;q=0.8,zh;q=0.7"),
        );
        headers.insert(
            REFERER,
            HeaderValue::from_static("https://buff.163.com/market/?game=csgo"),
        );
        headers.insert(
            "X-Requested-With",
            HeaderValue::from_static("XMLHttpRequest"),
        );

        let cookie = std::env::var(&buff.cookie_env).ok().map(Secret::new);
        if cookie.is_none() {
            warn!(
                env = %buff.cookie_env,
                "Buff session cookie not set; some endpoints may return thinner results"
            );
        }

        Ok(Self {
            http: build_client(headers)?,
            limiter: RateLimiter::new(limits.requests_per_minute),
            retry: RetryPolicy::from(limits),
            game: buff.game.clone(),
            cookie,
        })
    }

    /// GET with the session cookie attached when present.
    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.http.get(url);
        match &self.cookie {
            Some(cookie) => req.header(COOKIE, cookie.expose_secret().as_str()),
            None => req,
        }
    }

    /// Pull a price out of an order entry. Buff sends prices as strings
    /// ("8.5"); tolerate plain numbers too.
    fn order_price(order: &serde_json::Value) -> Option<f64> {
        let v = order.get("price")?;
        v.as_f64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
    }

    /// Normalize an order listing into a `Quote`.
    ///
    /// Best price is the first order in the marketplace's own sort: lowest
    /// ask for sell orders, highest bid for buy orders. An empty listing is
    /// still a successful observation: null best price, order count zero.
    fn normalize_orders(side: OrderSide, raw: RawResponse) -> FetchResult<Quote> {
        let body = raw.body;

        let orders = body
            .get("data")
            .and_then(|d| d.get("items"))
            .and_then(|i| i.as_array())
            .cloned()
            .unwrap_or_default();

        let best = orders.first().and_then(Self::order_price);
        let order_count = orders.len() as i64;

        let (best_bid, best_ask) = match side {
            OrderSide::Sell => (None, best),
            OrderSide::Buy => (best, None),
        };

        Ok(Quote {
            source: Source::Buff,
            best_bid,
            best_ask,
            median_price: None,
            volume: None,
            order_count: Some(order_count),
            raw: body,
            status: raw.status,
            latency_ms: raw.latency_ms,
        })
    }

    /// Extract search candidates in marketplace order.
    fn normalize_search(raw: &RawResponse) -> Vec<GoodsCandidate> {
        raw.body
            .get("data")
            .and_then(|d| d.get("items"))
            .and_then(|i| i.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let goods_id = item.get("id").and_then(|v| v.as_i64())?;
                        let name = item
                            .get("market_hash_name")
                            .or_else(|| item.get("name"))
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        Some(GoodsCandidate { goods_id, name })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn fetch_orders(&mut self, goods_id: i64, side: OrderSide) -> FetchResult<Quote> {
        let (path, sort, endpoint) = match side {
            OrderSide::Sell => ("sell_order", "&sort_by=default", ENDPOINT_SELL),
            OrderSide::Buy => ("buy_order", "", ENDPOINT_BUY),
        };
        let url = format!(
            "{BASE_URL}/{path}?game={}&goods_id={goods_id}&page_num=1{sort}",
            self.game,
        );
        debug!(goods_id, endpoint, "Fetching Buff order listing");

        self.limiter.acquire().await;
        let raw = send_with_retry(self.get(&url), &self.retry, endpoint).await?;
        Self::normalize_orders(side, raw)
    }
}

#[async_trait]
impl MarketFetcher for BuffFetcher {
    fn source(&self) -> Source {
        Source::Buff
    }

    /// Quote capability: the sell-side listing for an already-resolved
    /// goods id. Resolution itself is the orchestrator's job via `search`.
    async fn fetch_quote(&mut self, item: &Item) -> FetchResult<Quote> {
        match item.buff_goods_id {
            Some(goods_id) => self.fetch_orders(goods_id, OrderSide::Sell).await,
            None => Err(FetchFailure::unresolved(&item.market_hash_name)),
        }
    }
}

#[async_trait]
impl OrderBookMarket for BuffFetcher {
    async fn search(&mut self, term: &str) -> FetchResult<Vec<GoodsCandidate>> {
        let url = format!(
            "{BASE_URL}?game={}&search={}&page_num=1&sort_by=sell_num.desc",
            self.game,
            urlencoding::encode(term),
        );
        debug!(term, "Searching Buff goods");

        self.limiter.acquire().await;
        let raw = send_with_retry(self.get(&url), &self.retry, ENDPOINT_SEARCH).await?;
        Ok(Self::normalize_search(&raw))
    }

    async fn fetch_asks(&mut self, goods_id: i64) -> FetchResult<Quote> {
        self.fetch_orders(goods_id, OrderSide::Sell).await
    }

    async fn fetch_bids(&mut self, goods_id: i64) -> FetchResult<Quote> {
        self.fetch_orders(goods_id, OrderSide::Buy).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
