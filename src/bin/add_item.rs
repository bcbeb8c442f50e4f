//! One-shot item registration helper.
//!
//! Usage: `add_item <market_hash_name> [buff_goods_id]`
//! Registers an item for tracking (or caches a known Buff goods id onto an
//! existing one). The puller resolves missing goods ids on its own.

use anyhow::{bail, Context, Result};

use skinflint::config::AppConfig;
use skinflint::store::SnapshotStore;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args.len() > 2 {
        bail!("usage: add_item <market_hash_name> [buff_goods_id]");
    }

    let market_hash_name = &args[0];
    let buff_goods_id = match args.get(1) {
        Some(raw) => Some(
            raw.parse::<i64>()
                .with_context(|| format!("Invalid buff goods id: {raw}"))?,
        ),
        None => None,
    };

    let cfg = AppConfig::load("config.toml")?;
    let store = SnapshotStore::open(&cfg.storage.db_path).await?;
    let item = store.get_or_create_item(market_hash_name, buff_goods_id).await?;

    println!("Item registered: {item}");
    Ok(())
}
