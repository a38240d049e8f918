use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, Settings};
use engine::{
    store, CalibrationService, GenerationConfig, MonitorConfig, MonitorService, SignalService,
    SqliteStore,
};
use market::ProviderChain;

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let settings = Settings::load(&cfg.settings_path);
    let timeframe = settings.generation_timeframe();
    info!(symbol = %settings.symbol, %timeframe, "Vigil starting");

    // ── Database ──────────────────────────────────────────────────────────────
    let pool = SqlitePool::connect(&cfg.database_url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to database: {e}"));
    store::migrate(&pool)
        .await
        .unwrap_or_else(|e| panic!("Database migration failed: {e}"));
    info!("Database ready");

    // ── Market data + services ────────────────────────────────────────────────
    let market = Arc::new(ProviderChain::default_chain(cfg.cryptocompare_api_key.clone()));
    let signal_store = Arc::new(SqliteStore::new(pool));

    let generation = GenerationConfig {
        symbol: settings.symbol.clone(),
        expiry_minutes: settings.expiry_minutes,
        duplicate_window_minutes: settings.duplicate_window_minutes,
    };
    let generator = Arc::new(SignalService::new(
        market.clone(),
        signal_store.clone(),
        generation,
    ));

    let monitor = Arc::new(MonitorService::new(
        market.clone(),
        signal_store.clone(),
        MonitorConfig {
            symbol: settings.symbol.clone(),
            ..MonitorConfig::default()
        },
    ));

    let calibration = Arc::new(CalibrationService::new(signal_store.clone()));

    // ── Recurring jobs ────────────────────────────────────────────────────────
    // Each job runs on its own sequential loop; a run always finishes before
    // the next tick of the same job is honored.
    {
        let generator = generator.clone();
        let secs = settings.jobs.generation_secs;
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match generator.evaluate(timeframe).await {
                    Ok(Some(signal)) => {
                        info!(signal_id = %signal.id, direction = %signal.direction, "new signal")
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "signal generation cycle failed"),
                }
            }
        });
    }

    {
        let generator = generator.clone();
        let secs = settings.jobs.dynamic_secs;
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match generator.run_dynamic_analysis().await {
                    Ok(Some(signal)) => {
                        info!(signal_id = %signal.id, direction = %signal.direction, "dynamic signal")
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "dynamic analysis cycle failed"),
                }
            }
        });
    }

    {
        let monitor = monitor.clone();
        let secs = settings.jobs.monitor_secs;
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = monitor.monitor_active_signals().await {
                    warn!(error = %e, "monitoring cycle failed");
                }
            }
        });
    }

    {
        let calibration = calibration.clone();
        let secs = settings.jobs.calibration_secs;
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // skip the immediate first tick; calibration needs history
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = calibration.recalibrate().await {
                    warn!(error = %e, "calibration run failed");
                }
            }
        });
    }

    info!("All recurring jobs started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await.unwrap();
    info!("Shutdown signal received. Exiting.");
}
