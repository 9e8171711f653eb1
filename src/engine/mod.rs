//! Market lifecycle engine.
//!
//! Owns one `MarketState` per tracked market and advances all of them on a
//! fixed-rate clock:
//! - refreshes the account balance and discovers new markets on timers
//! - applies one lifecycle step per market per tick, serially
//! - unsubscribes and forgets a market once it is settled
//!
//! Before the first tick, positions that already exist on the exchange are
//! reconciled into traded states so only settlement polling remains.

mod lifecycle;
mod market;


pub use market::{Entry, MarketPhase, MarketState, PendingOrder};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::book::{OrderBookStore, SubscriptionManager};
use crate::config::EngineConfig;
use crate::connectors::TradingApi;
use crate::estimator::WinRatePosterior;
use crate::journal::EventRecorder;
use crate::types::Side;

use lifecycle::{elapsed, Services, Step};

pub struct Engine {
    services: Services,
    markets: HashMap<String, MarketState>,
    balance: i64,
    last_balance_sync: Option<DateTime<Utc>>,
    last_discovery: Option<DateTime<Utc>>,
    posterior: Option<WinRatePosterior>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        api: Arc<dyn TradingApi>,
        books: Arc<OrderBookStore>,
        subscriptions: Arc<SubscriptionManager>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            services: Services {
                config,
                api,
                books,
                subscriptions,
                recorder,
            },
            markets: HashMap::new(),
            balance: 0,
            last_balance_sync: None,
            last_discovery: None,
            posterior: None,
        }
    }

    /// Attaches a win-rate observer fed with every recorded settlement.
    pub fn with_posterior(mut self, posterior: WinRatePosterior) -> Self {
        self.posterior = Some(posterior);
        self
    }

    /// Seeds the balance, e.g. with the one verified at startup.
    pub fn set_balance(&mut self, balance_cents: i64, at: DateTime<Utc>) {
        self.balance = balance_cents;
        self.last_balance_sync = Some(at);
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    pub fn market(&self, ticker: &str) -> Option<&MarketState> {
        self.markets.get(ticker)
    }

    pub fn markets(&self) -> impl Iterator<Item = &MarketState> {
        self.markets.values()
    }

    pub fn tracked_count(&self) -> usize {
        self.markets.len()
    }

    pub fn posterior(&self) -> Option<&WinRatePosterior> {
        self.posterior.as_ref()
    }

    /// Reconciles existing positions, then ticks until shutdown.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) {
        self.reconcile(Utc::now()).await;

        let mut interval = tokio::time::interval(self.services.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            dry_run = self.services.config.dry_run,
            series = %self.services.config.series_ticker,
            "strategy engine started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(tracked = self.markets.len(), "strategy engine stopping");
                    break;
                }
                _ = interval.tick() => self.tick_at(Utc::now()).await,
            }
        }
    }

    /// One driving-loop iteration at time `now`.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) {
        if elapsed(self.last_balance_sync, now, self.services.config.balance_refresh) {
            match self.services.api.get_balance().await {
                Ok(balance) => self.set_balance(balance, now),
                Err(e) => warn!(err = %e, "balance refresh failed"),
            }
        }

        if elapsed(self.last_discovery, now, self.services.config.discovery_interval) {
            self.discover(now).await;
            self.last_discovery = Some(now);
        }

        let mut tickers: Vec<String> = self.markets.keys().cloned().collect();
        tickers.sort();

        for ticker in tickers {
            let Some(state) = self.markets.get_mut(&ticker) else {
                continue;
            };
            if state.settled {
                continue;
            }

            let step = self.services.step(state, self.balance, now).await;
            if let Step::Settled { won } = step {
                if let (Some(won), Some(posterior)) = (won, self.posterior.as_mut()) {
                    posterior.observe(won);
                    info!(posterior = %posterior, "win-rate posterior updated");
                }
                self.cleanup(&ticker);
            }
        }
    }

    /// Starts tracking every open market in the series not already known.
    async fn discover(&mut self, now: DateTime<Utc>) {
        let config = &self.services.config;
        let markets = match self.services.api.get_markets(&config.series_ticker, "open").await {
            Ok(markets) => markets,
            Err(e) => {
                warn!(err = %e, "market discovery failed");
                return;
            }
        };

        for market in markets {
            if self.markets.contains_key(&market.ticker) {
                continue;
            }

            let Some(close_time) = market.close_time_parsed() else {
                warn!(ticker = %market.ticker, close_time = %market.close_time, "bad close time");
                continue;
            };
            if close_time <= now {
                continue;
            }

            let strike = market.strike_price();
            let mut state = MarketState::discovered(&market.ticker, close_time, strike);
            self.services.subscriptions.subscribe(&[market.ticker.clone()]);
            state.subscribed = true;

            info!(
                ticker = %market.ticker,
                close_time = %close_time.to_rfc3339(),
                secs_to_close = state.seconds_to_close(now),
                strike = ?strike,
                "market discovered"
            );
            self.markets.insert(market.ticker.clone(), state);
        }
    }

    /// Seeds traded states for positions opened before this process started.
    /// Skipped in simulation mode.
    pub async fn reconcile(&mut self, now: DateTime<Utc>) {
        if self.services.config.dry_run {
            info!("skipping position reconciliation (dry-run mode)");
            return;
        }

        let positions = match self.services.api.get_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                error!(err = %e, "position reconciliation failed");
                return;
            }
        };

        let prefix = format!("{}-", self.services.config.series_ticker);
        let mut reconciled = 0;

        for position in positions {
            if position.position == 0 || !position.ticker.starts_with(&prefix) {
                continue;
            }
            if self.markets.contains_key(&position.ticker) {
                continue;
            }

            let market = match self.services.api.get_market(&position.ticker).await {
                Ok(market) => market,
                Err(e) => {
                    warn!(ticker = %position.ticker, err = %e, "reconcile: failed to get market");
                    continue;
                }
            };
            if !market.result.is_empty() {
                continue;
            }
            let Some(close_time) = market.close_time_parsed() else {
                warn!(ticker = %position.ticker, "reconcile: bad close time");
                continue;
            };

            let side = if position.position > 0 { Side::Yes } else { Side::No };
            let contracts = position.position.abs();
            let entry = self
                .services
                .reconstruct_entry(&position.ticker, side, contracts)
                .await;

            let mut state =
                MarketState::reconciled(&position.ticker, close_time, market.strike_price(), entry);
            if close_time > now {
                self.services.subscriptions.subscribe(&[position.ticker.clone()]);
                state.subscribed = true;
            }

            info!(
                ticker = %position.ticker,
                side = %side,
                contracts,
                avg_price = entry.price,
                fee = entry.fee_cents,
                close_time = %close_time.to_rfc3339(),
                "reconciled position"
            );
            self.markets.insert(position.ticker.clone(), state);
            reconciled += 1;
        }

        info!(reconciled, "position reconciliation complete");
    }

    // The only path that forgets a market.
    fn cleanup(&mut self, ticker: &str) {
        self.services.subscriptions.unsubscribe(&[ticker.to_string()]);
        self.markets.remove(ticker);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("series", &self.services.config.series_ticker)
            .field("dry_run", &self.services.config.dry_run)
            .field("balance", &self.balance)
            .field("tracked", &self.markets.len())
            .finish()
    }
}
