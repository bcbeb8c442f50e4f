//! On-demand risk assessment over the latest persisted observations.
//!
//! Usage: `assess [item_id]`
//! For each tracked item (or just the given one), reads the latest
//! observation per source and the configured history window, runs the
//! Monte Carlo hold-period assessment, and prints the scored
//! recommendation. Nothing is persisted; assessments are ephemeral.

use anyhow::{Context, Result};

use skinflint::config::AppConfig;
use skinflint::risk::{spread_pct, RiskEngine};
use skinflint::store::SnapshotStore;
use skinflint::types::Source;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    let store = SnapshotStore::open(&cfg.storage.db_path).await?;
    let mut engine = RiskEngine::new(cfg.risk.clone());

    let item_filter: Vec<i64> = match std::env::args().nth(1) {
        Some(raw) => vec![raw
            .parse::<i64>()
            .with_context(|| format!("Invalid item id: {raw}"))?],
        None => Vec::new(),
    };

    let items = store.list_items(&item_filter).await?;
    if items.is_empty() {
        println!("No items to assess.");
        return Ok(());
    }

    for item in items {
        let steam_latest = store
            .latest_observations(Some(item.item_id), Source::Steam)
            .await?;
        let buff_latest = store
            .latest_observations(Some(item.item_id), Source::Buff)
            .await?;

        let (Some(steam_row), Some(buff_row)) = (steam_latest.first(), buff_latest.first())
        else {
            println!("{item}: no observations on both sources yet");
            continue;
        };

        // Sell side is what a Steam listing would realise; the priceoverview
        // endpoint carries no bids, so the lowest ask stands in.
        let (Some(sell_price), Some(buy_ask)) =
            (steam_row.best_bid.or(steam_row.best_ask), buff_row.best_ask)
        else {
            println!("{item}: latest observations carry no usable prices");
            continue;
        };

        let history = store
            .price_history(item.item_id, cfg.risk.history_window_days)
            .await?;
        let sell_prices: Vec<f64> = history.steam.iter().map(|p| p.price).collect();

        let assessment = engine.assess(sell_price, buy_ask, &sell_prices);
        let score = engine.score(&assessment);

        println!(
            "{item}: pnl_now={:.2} ({:+.1}%) p(+)={:.2} E[pnl]={:.2} \
             VaR95={:.2} VaR99={:.2} worst={:.2} score={:.3} → {}",
            assessment.current_pnl,
            spread_pct(assessment.current_pnl, buy_ask),
            assessment.prob_positive,
            assessment.expected_pnl,
            assessment.var_95,
            assessment.var_99,
            assessment.worst_case,
            score,
            assessment.action,
        );
    }

    Ok(())
}
