//! Kalshi BTC 15-minute bot - Main Entry Point
//!
//! Verifies credentials, opens the journal, then runs two tasks until
//! SIGINT or SIGTERM: the order book watcher and the strategy engine. Any startup
//! failure exits before either task starts.

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use kalshi_bot::book::{OrderBookStore, SubscriptionManager};
use kalshi_bot::config::BotConfig;
use kalshi_bot::connectors::{ApiCredentials, KalshiApiClient, TradingApi};
use kalshi_bot::engine::Engine;
use kalshi_bot::estimator::WinRatePosterior;
use kalshi_bot::journal::{EventRecorder, Journal, JournalRecord, SessionStart};
use kalshi_bot::utils::init_telemetry;
use kalshi_bot::watchers::{OrderBookWatcher, OrderBookWatcherConfig};

#[derive(Debug, Parser)]
#[command(name = "kalshi-bot", about = "Kalshi 15-minute binary market trading bot")]
struct Cli {
    /// Simulate fills instead of sending orders, regardless of DRY_RUN.
    #[arg(long)]
    dry_run: bool,

    /// Default log level to debug (RUST_LOG still takes precedence).
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Note: No .env file found or error loading it: {}", e);
    }

    let cli = Cli::parse();
    let mut config = BotConfig::from_env().context("invalid configuration")?;
    if cli.dry_run {
        config.dry_run = true;
    }

    init_telemetry(config.log_format, cli.debug);

    info!(
        env = %config.env,
        dry_run = config.dry_run,
        series = %config.series_ticker,
        journal = %config.journal_path.display(),
        "starting Kalshi bot"
    );

    let credentials = ApiCredentials::from_key_file(config.api_key_id.clone(), &config.private_key_path)
        .context("failed to load private key")?;
    let api = KalshiApiClient::new(config.env.rest_base_url().to_string(), credentials.clone())
        .context("failed to build REST client")?;

    let balance = api
        .get_balance()
        .await
        .context("authentication check failed (balance request)")?;
    info!(balance_cents = balance, "authenticated");

    let journal = Journal::open(&config.journal_path).context("failed to open journal")?;
    journal
        .record(&JournalRecord::SessionStart(SessionStart {
            time: Utc::now(),
            dry_run: config.dry_run,
            env: config.env.to_string(),
            balance_cents: balance,
        }))
        .context("failed to write session start")?;

    let posterior = match &config.posterior_path {
        Some(path) => match WinRatePosterior::load(path) {
            Ok(p) => {
                info!(posterior = %p, "win-rate posterior loaded");
                Some(p)
            }
            Err(e) => {
                warn!(err = %e, "failed to load posterior, continuing without it");
                None
            }
        },
        None => None,
    };

    let books = Arc::new(OrderBookStore::new());
    let subscriptions = Arc::new(SubscriptionManager::new(books.clone()));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let watcher = OrderBookWatcher::new(
        OrderBookWatcherConfig::new(config.env.ws_url().to_string()),
        credentials,
        books.clone(),
        subscriptions.clone(),
    );
    let watcher_handle = tokio::spawn(watcher.run(shutdown_tx.subscribe()));

    let mut engine = Engine::new(
        config.engine_config(),
        Arc::new(api),
        books,
        subscriptions,
        Arc::new(journal),
    );
    if let Some(p) = posterior {
        engine = engine.with_posterior(p);
    }
    engine.set_balance(balance, Utc::now());

    let engine_shutdown = shutdown_tx.subscribe();
    let stop_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_stop_signal().await {
            error!(err = %e, "failed to listen for stop signals, shutting down");
        }
        let _ = stop_tx.send(());
    });

    info!("Press Ctrl+C or send SIGTERM to stop.");
    engine.run(engine_shutdown).await;

    if let Err(e) = watcher_handle.await {
        error!(err = ?e, "order book watcher task failed");
    }

    if let (Some(path), Some(posterior)) = (&config.posterior_path, engine.posterior()) {
        match posterior.save(path) {
            Ok(()) => info!(posterior = %posterior, "win-rate posterior saved"),
            Err(e) => error!(err = %e, "failed to save posterior"),
        }
    }

    info!("Shut down cleanly.");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM (Ctrl+C elsewhere).
async fn wait_for_stop_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_resolves_stop_signal() {
        let waiter = tokio::spawn(wait_for_stop_signal());
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("SIGTERM was not observed")
            .unwrap()
            .unwrap();
    }
}
