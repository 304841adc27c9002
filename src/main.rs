// src/main.rs
use anyhow::Context;
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tilson_reaper::config::{AppConfig, WatchMode};
use tilson_reaper::connectors::futures_hub::FuturesHub;
use tilson_reaper::connectors::kucoin::{KucoinClient, PollingWatcher};
use tilson_reaper::connectors::traits::{BalanceService, ProfitWatcher};
use tilson_reaper::core::engine::{EngineSettings, TradingEngine};
use tilson_reaper::core::retry::RetryPolicy;
use tilson_reaper::error::ExchangeError;
use tilson_reaper::strategies::tilson::TilsonStrategy;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(log_dir: &str) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, "tilson_reaper.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tilson_reaper=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // 1. Load Configuration
    let config = AppConfig::new().context("failed to load configuration")?;
    let _log_guard = init_tracing(&config.log_dir);

    info!("========================================");
    info!("       TILSON REAPER - v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Target: {}", config.strategy.symbol);
    info!("Watch:  {:?}", config.strategy.watch_mode);

    // 2. Initialize Components
    let client = Arc::new(KucoinClient::new(&config).context("failed to build KuCoin client")?);
    let cancel = CancellationToken::new();

    match client.get_balance(None, &cancel).await {
        Ok(balance) => info!("Available balance: {}", balance),
        Err(e @ ExchangeError::Configuration(_)) => return Err(e).context("credentials rejected"),
        Err(e) => warn!("Could not read balance: {}", e),
    }

    let watcher: Arc<dyn ProfitWatcher> = match config.strategy.watch_mode {
        WatchMode::Polling => Arc::new(PollingWatcher::new(client.clone())),
        WatchMode::Streaming => Arc::new(FuturesHub::new(
            client.clone(),
            RetryPolicy::websocket(&config.ws_retry),
            Duration::from_secs(config.ws_receive_timeout_secs),
        )),
    };

    let strategy = TilsonStrategy::new(config.strategy.t3_period, config.strategy.volume_factor);
    let engine = TradingEngine::new(
        strategy,
        client.clone(),
        client.clone(),
        client,
        watcher,
        EngineSettings::from(&config.strategy),
    );

    // 3. Shutdown on Ctrl+C
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, stopping strategy");
            shutdown.cancel();
        }
    });

    // 4. Run Engine
    if let Err(e) = engine.run(cancel).await {
        error!("Fatal Engine Error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
