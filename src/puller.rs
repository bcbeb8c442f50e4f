//! Polling orchestrator.
//!
//! Drives repeated fetch cycles over every tracked item: Steam quote →
//! persist → Buff goods-id resolution (when unknown) → Buff sell orders →
//! persist, with short pauses between steps so the two marketplaces are
//! never hit back-to-back. Execution is strictly sequential; both rate
//! budgets are shared across all items, so there is no cross-item or
//! cross-source parallelism.
//!
//! Failure isolation: any single item failing at any step never aborts the
//! cycle for the remaining items. Every attempt, success or failure, lands
//! in the fetch log.

use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::PullerConfig;
use crate::fetch::{buff, steam, MarketFetcher, OrderBookMarket};
use crate::store::SnapshotStore;
use crate::types::{FetchFailure, FetchLogEntry, Item, Source};

// ---------------------------------------------------------------------------
// Step sequence
// ---------------------------------------------------------------------------

/// Per-item fetch sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    SteamQuote,
    BuffResolve,
    BuffOrders,
}

impl Step {
    fn source(self) -> Source {
        match self {
            Step::SteamQuote => Source::Steam,
            Step::BuffResolve | Step::BuffOrders => Source::Buff,
        }
    }

    fn endpoint(self) -> &'static str {
        match self {
            Step::SteamQuote => steam::ENDPOINT,
            Step::BuffResolve => buff::ENDPOINT_SEARCH,
            Step::BuffOrders => buff::ENDPOINT_SELL,
        }
    }
}

/// An unexpected error (store I/O, bad state) tagged with the step it
/// surfaced in, so the audit log records where the item's cycle died.
struct StepError {
    step: Step,
    error: anyhow::Error,
}

fn at(step: Step) -> impl FnOnce(anyhow::Error) -> StepError {
    move |error| StepError { step, error }
}

// ---------------------------------------------------------------------------
// Cycle reporting
// ---------------------------------------------------------------------------

/// Outcome counters for one full cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleReport {
    pub items: usize,
    pub steam_ok: usize,
    pub buff_ok: usize,
    pub resolved: usize,
    /// Items whose processing hit an unexpected error (not ordinary fetch
    /// failures, which are logged and counted implicitly).
    pub errors: usize,
}

// ---------------------------------------------------------------------------
// Puller
// ---------------------------------------------------------------------------

/// Sequential per-item puller over both marketplaces.
pub struct Puller<A, B>
where
    A: MarketFetcher,
    B: OrderBookMarket,
{
    store: SnapshotStore,
    steam: A,
    buff: B,
    cfg: PullerConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<A, B> Puller<A, B>
where
    A: MarketFetcher,
    B: OrderBookMarket,
{
    pub fn new(store: SnapshotStore, steam: A, buff: B, cfg: PullerConfig) -> Self {
        Self {
            store,
            steam,
            buff,
            cfg,
            shutdown: None,
        }
    }

    /// Attach a shutdown signal. The puller observes it between items and
    /// between cycles; in-flight calls run to completion or their timeout.
    pub fn with_shutdown(mut self, rx: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(rx);
        self
    }

    fn should_stop(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn pause(&self) {
        tokio::time::sleep(Duration::from_millis(self.cfg.step_pause_ms)).await;
    }

    /// Run one fetch cycle over all tracked items.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let items = self.store.list_items(&self.cfg.items).await?;
        let mut report = CycleReport {
            items: items.len(),
            ..Default::default()
        };

        if items.is_empty() {
            warn!("No items to fetch. Register items first.");
            return Ok(report);
        }

        info!(count = items.len(), "Starting fetch cycle");

        for mut item in items {
            if self.should_stop() {
                info!("Stop requested, ending cycle early");
                break;
            }

            if let Err(StepError { step, error }) =
                self.process_item(&mut item, &mut report).await
            {
                report.errors += 1;
                error!(
                    item = %item,
                    step = ?step,
                    error = %error,
                    "Unexpected error, continuing with next item"
                );
                let entry = FetchLogEntry {
                    source: step.source(),
                    endpoint: step.endpoint(),
                    status: None,
                    latency_ms: None,
                    success: false,
                    error: Some(format!("unexpected error: {error:#}")),
                    item_id: Some(item.item_id),
                };
                if let Err(log_error) = self.store.log_fetch(&entry).await {
                    error!(error = %log_error, "Failed to record error log entry");
                }
            }
        }

        info!(
            steam = format!("{}/{}", report.steam_ok, report.items),
            buff = format!("{}/{}", report.buff_ok, report.items),
            resolved = report.resolved,
            errors = report.errors,
            "Fetch cycle complete"
        );

        Ok(report)
    }

    /// Process one item through the full step sequence. Ordinary fetch
    /// failures are logged and absorbed here; only unexpected errors
    /// (store I/O) propagate, tagged with their step.
    async fn process_item(
        &mut self,
        item: &mut Item,
        report: &mut CycleReport,
    ) -> Result<(), StepError> {
        // Step 1: Steam quote. Either outcome continues the sequence.
        match self.steam.fetch_quote(item).await {
            Ok(quote) => {
                self.store
                    .insert_steam_snapshot(item.item_id, &quote)
                    .await
                    .map_err(at(Step::SteamQuote))?;
                self.store
                    .log_fetch(&FetchLogEntry::success(
                        Source::Steam,
                        steam::ENDPOINT,
                        &quote,
                        item.item_id,
                    ))
                    .await
                    .map_err(at(Step::SteamQuote))?;
                report.steam_ok += 1;
            }
            Err(failure) => {
                warn!(item = %item, error = %failure, "Steam fetch failed");
                self.store
                    .log_fetch(&FetchLogEntry::failure(
                        Source::Steam,
                        steam::ENDPOINT,
                        &failure,
                        item.item_id,
                    ))
                    .await
                    .map_err(at(Step::SteamQuote))?;
            }
        }

        // Step 2: small pause before touching the other marketplace.
        self.pause().await;

        // Step 3: resolve the Buff goods id when unknown. Failure or an
        // empty result skips Buff for this item this cycle only.
        if item.buff_goods_id.is_none() {
            let failure = match self.buff.search(&item.market_hash_name).await {
                Ok(candidates) => match candidates.first() {
                    Some(first) => {
                        self.store
                            .set_buff_goods_id(item.item_id, first.goods_id)
                            .await
                            .map_err(at(Step::BuffResolve))?;
                        item.buff_goods_id = Some(first.goods_id);
                        report.resolved += 1;
                        info!(
                            item = %item.market_hash_name,
                            goods_id = first.goods_id,
                            candidate = %first.name,
                            "Resolved Buff goods id"
                        );
                        None
                    }
                    None => Some(FetchFailure::unresolved(&item.market_hash_name)),
                },
                Err(failure) => Some(failure),
            };

            if let Some(failure) = failure {
                warn!(item = %item, error = %failure, "Buff resolution failed, skipping this cycle");
                self.store
                    .log_fetch(&FetchLogEntry::failure(
                        Source::Buff,
                        buff::ENDPOINT_SEARCH,
                        &failure,
                        item.item_id,
                    ))
                    .await
                    .map_err(at(Step::BuffResolve))?;
                return Ok(());
            }
        }

        let Some(goods_id) = item.buff_goods_id else {
            return Ok(());
        };

        // Step 4: Buff sell-side observation.
        match self.buff.fetch_asks(goods_id).await {
            Ok(quote) => {
                self.store
                    .insert_buff_snapshot(item.item_id, Some(&quote), None)
                    .await
                    .map_err(at(Step::BuffOrders))?;
                self.store
                    .log_fetch(&FetchLogEntry::success(
                        Source::Buff,
                        buff::ENDPOINT_SELL,
                        &quote,
                        item.item_id,
                    ))
                    .await
                    .map_err(at(Step::BuffOrders))?;
                report.buff_ok += 1;
            }
            Err(failure) => {
                warn!(item = %item, error = %failure, "Buff fetch failed");
                self.store
                    .log_fetch(&FetchLogEntry::failure(
                        Source::Buff,
                        buff::ENDPOINT_SELL,
                        &failure,
                        item.item_id,
                    ))
                    .await
                    .map_err(at(Step::BuffOrders))?;
            }
        }

        // Step 5: pause again before the next item.
        self.pause().await;

        Ok(())
    }

    /// Run cycles until the shutdown signal fires. A cycle-level error
    /// (store unavailable) escapes and terminates the loop; per-item
    /// failures never do.
    pub async fn run(&mut self) -> Result<()> {
        let interval = Duration::from_secs(self.cfg.interval_secs);
        info!(
            interval_secs = self.cfg.interval_secs,
            "Entering puller loop"
        );

        loop {
            if self.should_stop() {
                break;
            }

            self.run_cycle().await?;

            if self.should_stop() {
                break;
            }

            info!(secs = interval.as_secs(), "Sleeping until next cycle");
            match self.shutdown.clone() {
                Some(mut rx) => {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        changed = rx.changed() => {
                            // A dropped sender means no further signals can
                            // arrive; finish the wait instead of spinning.
                            if changed.is_err() {
                                tokio::time::sleep(interval).await;
                            }
                        }
                    }
                }
                None => tokio::time::sleep(interval).await,
            }
        }

        info!("Puller stopped");
        Ok(())
    }
}
