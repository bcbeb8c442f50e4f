//! SKINFLINT: cross-marketplace skin price tracker
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the snapshot store, and runs the fetch→persist puller loop with
//! graceful shutdown.

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

use skinflint::config::AppConfig;
use skinflint::fetch::buff::BuffFetcher;
use skinflint::fetch::steam::SteamFetcher;
use skinflint::puller::Puller;
use skinflint::store::SnapshotStore;

const BANNER: &str = r#"
      _    _        __ _ _       _
  ___| | _(_)_ __  / _| (_)_ __ | |_
 / __| |/ /| | '_ \| |_| | | '_ \| __|
 \__ \   < | | | | |  _| | | | | | |_
 |___/_|\_\|_|_| |_|_| |_|_|_| |_|\__|

  Buy on Buff, wait out the hold, sell on Steam
  v0.1.0 - Market Tracker
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    let run_once = std::env::args().any(|a| a == "--once");

    println!("{BANNER}");
    info!(
        interval_secs = cfg.puller.interval_secs,
        steam_rpm = cfg.rate_limits.steam.requests_per_minute,
        buff_rpm = cfg.rate_limits.buff.requests_per_minute,
        db_path = %cfg.storage.db_path,
        run_once,
        "SKINFLINT starting up"
    );

    // -- Initialise components -------------------------------------------

    let store = SnapshotStore::open(&cfg.storage.db_path).await?;
    let steam = SteamFetcher::new(&cfg.steam, &cfg.rate_limits.steam)?;
    let buff = BuffFetcher::new(&cfg.buff, &cfg.rate_limits.buff)?;

    // Shutdown signal: observed by the puller between items and between
    // cycles, so in-flight calls finish or time out rather than being
    // torn down mid-request.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received.");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut puller =
        Puller::new(store, steam, buff, cfg.puller.clone()).with_shutdown(shutdown_rx);

    // -- Main loop -------------------------------------------------------

    if run_once {
        puller.run_cycle().await?;
    } else {
        puller.run().await?;
    }

    info!("SKINFLINT shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("skinflint=info"));

    let json_logging = std::env::var("SKINFLINT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
