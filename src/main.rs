use anyhow::Result;
use signalbot::db::Store;
use signalbot::{EngineConfig, SignalEngine};
use tokio::time::{interval, Duration, MissedTickBehavior};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    tracing::info!("🚀 Signalbot starting");

    let config = EngineConfig::from_env()?;
    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Watchlist: {} assets", config.watchlist.len());
    for asset in &config.watchlist {
        tracing::info!("    - {} ({})", asset.symbol, asset.name);
    }
    tracing::info!("  Scan interval: {}s", config.scan_interval_secs);
    tracing::info!("  Confidence threshold: {}", config.confidence_threshold);
    tracing::info!("  Cooldown: {} min", config.cooldown_minutes);
    tracing::info!(
        "  Advisory: {}",
        if config.advisory_enabled { "enabled" } else { "disabled" }
    );

    let store = Store::new(&config.database_url).await?;
    let scan_interval_secs = config.scan_interval_secs;
    let engine = SignalEngine::new(config, store)?;

    let mut ticker = interval(Duration::from_secs(scan_interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!("✅ Engine ready, scanning every {}s", scan_interval_secs);
    tracing::info!("Press Ctrl+C to stop...\n");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = engine.tick().await {
                    tracing::error!("Scan cycle failed: {:#}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    tracing::info!("👋 Signalbot stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signalbot=info".into()),
        )
        .init();
}
