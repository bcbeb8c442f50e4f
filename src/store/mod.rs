//! Persistence layer.
//!
//! SQLite-backed append-only store for price snapshots and fetch audit
//! logs. All writes are inserts; the single exception is caching a resolved
//! Buff goods id onto its item. Reads provide the two query shapes the rest
//! of the system needs: latest observation per item/source, and a bounded
//! ascending history window for volatility estimation.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::types::{FetchLogEntry, Item, Quote, Source};

/// One persisted price observation, projected to the fields shared by both
/// snapshot tables.
#[derive(Debug, Clone)]
pub struct ObservationRow {
    pub snapshot_id: i64,
    pub item_id: i64,
    pub source: Source,
    pub captured_at: DateTime<Utc>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
}

/// One persisted fetch audit record.
#[derive(Debug, Clone)]
pub struct FetchLogRow {
    pub log_id: i64,
    pub source: String,
    pub endpoint: String,
    pub status_code: Option<i64>,
    pub latency_ms: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
    pub item_id: Option<i64>,
    pub logged_at: DateTime<Utc>,
}

/// A single point in a price history series.
#[derive(Debug, Clone, Copy)]
pub struct PricePoint {
    pub captured_at: DateTime<Utc>,
    pub price: f64,
}

/// Ascending-by-time price series per source for one item.
#[derive(Debug, Clone, Default)]
pub struct PriceHistory {
    pub steam: Vec<PricePoint>,
    pub buff: Vec<PricePoint>,
}

/// SQLite snapshot store. Cheap to clone; wraps a connection pool.
#[derive(Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    /// Open (creating if missing) the database at `db_path` and bring the
    /// schema up to date.
    pub async fn open(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create database directory {parent:?}"))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .with_context(|| format!("Invalid database path: {db_path}"))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database at {db_path}"))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;

        info!(db_path, "Database ready");
        Ok(Self { pool })
    }

    /// In-memory store for tests. Pinned to a single connection so the
    /// database outlives individual pool checkouts.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;

        Ok(Self { pool })
    }

    // -- Items ------------------------------------------------------------

    /// Fetch the item by primary name, creating it if unknown. When
    /// `buff_goods_id` is supplied and the stored item lacks one, it is
    /// cached onto the row.
    pub async fn get_or_create_item(
        &self,
        market_hash_name: &str,
        buff_goods_id: Option<i64>,
    ) -> Result<Item> {
        let existing = sqlx::query_as::<_, Item>(
            "SELECT item_id, market_hash_name, buff_goods_id, created_at, updated_at
             FROM items WHERE market_hash_name = ?",
        )
        .bind(market_hash_name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up item")?;

        if let Some(mut item) = existing {
            if let (Some(goods_id), None) = (buff_goods_id, item.buff_goods_id) {
                self.set_buff_goods_id(item.item_id, goods_id).await?;
                item.buff_goods_id = Some(goods_id);
            }
            return Ok(item);
        }

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO items (market_hash_name, buff_goods_id, created_at, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(market_hash_name)
        .bind(buff_goods_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to insert item")?;

        Ok(Item {
            item_id: result.last_insert_rowid(),
            market_hash_name: market_hash_name.to_string(),
            buff_goods_id,
            created_at: now,
            updated_at: now,
        })
    }

    /// Cache a resolved secondary identifier onto an item. The only
    /// non-insert write in the system.
    pub async fn set_buff_goods_id(&self, item_id: i64, goods_id: i64) -> Result<()> {
        sqlx::query("UPDATE items SET buff_goods_id = ?, updated_at = ? WHERE item_id = ?")
            .bind(goods_id)
            .bind(Utc::now())
            .bind(item_id)
            .execute(&self.pool)
            .await
            .context("Failed to update buff_goods_id")?;
        debug!(item_id, goods_id, "Cached resolved goods id");
        Ok(())
    }

    /// Tracked items, optionally restricted to explicit ids.
    pub async fn list_items(&self, ids: &[i64]) -> Result<Vec<Item>> {
        let items = if ids.is_empty() {
            sqlx::query_as::<_, Item>(
                "SELECT item_id, market_hash_name, buff_goods_id, created_at, updated_at
                 FROM items ORDER BY item_id",
            )
            .fetch_all(&self.pool)
            .await
        } else {
            let placeholders = vec!["?"; ids.len()].join(",");
            let sql = format!(
                "SELECT item_id, market_hash_name, buff_goods_id, created_at, updated_at
                 FROM items WHERE item_id IN ({placeholders}) ORDER BY item_id"
            );
            let mut query = sqlx::query_as::<_, Item>(&sql);
            for id in ids {
                query = query.bind(id);
            }
            query.fetch_all(&self.pool).await
        };

        items.context("Failed to list items")
    }

    // -- Snapshot writes --------------------------------------------------

    /// Append a Steam observation. Returns the generated snapshot id.
    pub async fn insert_steam_snapshot(&self, item_id: i64, quote: &Quote) -> Result<i64> {
        let raw = serde_json::to_string(&quote.raw).context("Failed to serialise raw payload")?;

        let result = sqlx::query(
            "INSERT INTO steam_snapshots
                 (item_id, captured_at, best_bid, best_ask, median_price, volume, raw_response)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(item_id)
        .bind(Utc::now())
        .bind(quote.best_bid)
        .bind(quote.best_ask)
        .bind(quote.median_price)
        .bind(quote.volume)
        .bind(raw)
        .execute(&self.pool)
        .await
        .context("Failed to insert steam snapshot")?;

        Ok(result.last_insert_rowid())
    }

    /// Append a Buff observation, merging the sell-side and (optional)
    /// buy-side listings into one row. Returns the generated snapshot id.
    pub async fn insert_buff_snapshot(
        &self,
        item_id: i64,
        sell: Option<&Quote>,
        buy: Option<&Quote>,
    ) -> Result<i64> {
        let primary = sell.or(buy).context("Buff snapshot needs at least one side")?;
        let raw =
            serde_json::to_string(&primary.raw).context("Failed to serialise raw payload")?;

        let result = sqlx::query(
            "INSERT INTO buff_snapshots
                 (item_id, captured_at, best_bid, best_ask, volume,
                  sell_order_count, buy_order_count, raw_response)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(item_id)
        .bind(Utc::now())
        .bind(buy.and_then(|q| q.best_bid))
        .bind(sell.and_then(|q| q.best_ask))
        .bind(primary.volume)
        .bind(sell.and_then(|q| q.order_count))
        .bind(buy.and_then(|q| q.order_count))
        .bind(raw)
        .execute(&self.pool)
        .await
        .context("Failed to insert buff snapshot")?;

        Ok(result.last_insert_rowid())
    }

    /// Append a fetch audit record. Returns the generated log id.
    pub async fn log_fetch(&self, entry: &FetchLogEntry) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO fetch_logs
                 (source, endpoint, status_code, latency_ms, success, error_message,
                  item_id, logged_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.source.as_str())
        .bind(entry.endpoint)
        .bind(entry.status.map(i64::from))
        .bind(entry.latency_ms)
        .bind(entry.success)
        .bind(entry.error.as_deref())
        .bind(entry.item_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to insert fetch log")?;

        Ok(result.last_insert_rowid())
    }

    // -- Reads ------------------------------------------------------------

    /// Most recent fetch log entries, newest first. Debugging/ops surface.
    pub async fn fetch_log_tail(&self, limit: i64) -> Result<Vec<FetchLogRow>> {
        let rows = sqlx::query(
            "SELECT log_id, source, endpoint, status_code, latency_ms, success,
                    error_message, item_id, logged_at
             FROM fetch_logs ORDER BY log_id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query fetch logs")?;

        rows.into_iter()
            .map(|row| {
                Ok(FetchLogRow {
                    log_id: row.try_get("log_id")?,
                    source: row.try_get("source")?,
                    endpoint: row.try_get("endpoint")?,
                    status_code: row.try_get("status_code")?,
                    latency_ms: row.try_get("latency_ms")?,
                    success: row.try_get("success")?,
                    error_message: row.try_get("error_message")?,
                    item_id: row.try_get("item_id")?,
                    logged_at: row.try_get("logged_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .context("Failed to decode fetch log row")
    }

    /// Latest observation per item for one source.
    ///
    /// "Latest" is correlated per item: items are polled at different
    /// points in a cycle, so their newest capture timestamps diverge and
    /// there is no single global latest row.
    pub async fn latest_observations(
        &self,
        item_id: Option<i64>,
        source: Source,
    ) -> Result<Vec<ObservationRow>> {
        let table = match source {
            Source::Steam => "steam_snapshots",
            Source::Buff => "buff_snapshots",
        };
        let sql = format!(
            "SELECT s.snapshot_id, s.item_id, s.captured_at, s.best_bid, s.best_ask
             FROM {table} s
             WHERE s.captured_at = (
                 SELECT MAX(s2.captured_at) FROM {table} s2 WHERE s2.item_id = s.item_id
             )
             AND (? IS NULL OR s.item_id = ?)
             ORDER BY s.item_id"
        );

        let rows = sqlx::query(&sql)
            .bind(item_id)
            .bind(item_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query latest observations")?;

        rows.into_iter()
            .map(|row| {
                Ok(ObservationRow {
                    snapshot_id: row.try_get("snapshot_id")?,
                    item_id: row.try_get("item_id")?,
                    source,
                    captured_at: row.try_get("captured_at")?,
                    best_bid: row.try_get("best_bid")?,
                    best_ask: row.try_get("best_ask")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .context("Failed to decode observation row")
    }

    /// Ascending price history per source for one item, bounded to
    /// `[now - window_days, now]`. Steam prices prefer the median traded
    /// price and fall back to the lowest ask; Buff prices are the best ask.
    pub async fn price_history(&self, item_id: i64, window_days: u32) -> Result<PriceHistory> {
        let cutoff = Utc::now() - Duration::days(i64::from(window_days));

        let steam = self
            .history_query(
                "SELECT captured_at, COALESCE(median_price, best_ask) AS price
                 FROM steam_snapshots
                 WHERE item_id = ? AND captured_at >= ?
                   AND COALESCE(median_price, best_ask) IS NOT NULL
                 ORDER BY captured_at ASC",
                item_id,
                cutoff,
            )
            .await?;

        let buff = self
            .history_query(
                "SELECT captured_at, best_ask AS price
                 FROM buff_snapshots
                 WHERE item_id = ? AND captured_at >= ?
                   AND best_ask IS NOT NULL
                 ORDER BY captured_at ASC",
                item_id,
                cutoff,
            )
            .await?;

        Ok(PriceHistory { steam, buff })
    }

    async fn history_query(
        &self,
        sql: &str,
        item_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>> {
        let rows = sqlx::query(sql)
            .bind(item_id)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query price history")?;

        rows.into_iter()
            .map(|row| {
                Ok(PricePoint {
                    captured_at: row.try_get("captured_at")?,
                    price: row.try_get("price")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .context("Failed to decode history row")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
