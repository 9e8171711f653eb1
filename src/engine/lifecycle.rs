//! Per-market lifecycle steps.
//!
//! Each tick applies exactly one step to a market: the first rule whose
//! guard matches. All timing is elapsed-time comparison against the `now`
//! passed in, so the whole machine runs on a simulated clock in tests.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::book::{OrderBookStore, SubscriptionManager};
use crate::config::EngineConfig;
use crate::connectors::{Fill, FillQuery, OrderRequest, TradingApi};
use crate::journal::{EventRecorder, JournalRecord, SettlementRecord, TradeRecord, DRY_RUN_ORDER_ID};
use crate::strategy::{compute_pnl, evaluate_signal, in_entry_window, kelly_size, taker_fee, Signal};
use crate::types::Side;

use super::market::{Entry, MarketState, PendingOrder};

/// Result of one step for one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Step {
    Idle,
    /// The market reached its terminal state and must be cleaned up.
    /// `won` is set when a settlement was recorded.
    Settled { won: Option<bool> },
}

/// Collaborators shared by every step.
pub(super) struct Services {
    pub config: EngineConfig,
    pub api: Arc<dyn TradingApi>,
    pub books: Arc<OrderBookStore>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub recorder: Arc<dyn EventRecorder>,
}

impl Services {
    pub async fn step(&self, state: &mut MarketState, balance: i64, now: DateTime<Utc>) -> Step {
        let closed = state.is_closed(now);

        if state.strike.is_none() && elapsed(state.last_strike_poll, now, self.config.strike_poll_interval) {
            self.poll_strike(state, now).await;
            return Step::Idle;
        }

        if closed && state.entry.is_some() && !state.settled {
            return self.poll_settlement(state, now).await;
        }

        if state.pending.is_some() {
            self.supervise_order(state, now).await;
            return Step::Idle;
        }

        if closed {
            info!(ticker = %state.ticker, "market closed without a position");
            state.settled = true;
            return Step::Settled { won: None };
        }

        if state.evaluated || state.entry.is_some() || !in_entry_window(state.seconds_to_close(now)) {
            return Step::Idle;
        }

        if let Some(signal) = self.evaluate(state, now) {
            self.place_order(state, signal, balance, now).await;
        }
        Step::Idle
    }

    async fn poll_strike(&self, state: &mut MarketState, now: DateTime<Utc>) {
        state.last_strike_poll = Some(now);
        match self.api.get_market(&state.ticker).await {
            Ok(market) => {
                if let Some(strike) = market.strike_price() {
                    info!(ticker = %state.ticker, strike, "strike fetched");
                    state.strike = Some(strike);
                }
            }
            Err(e) => warn!(ticker = %state.ticker, err = %e, "strike poll failed"),
        }
    }

    async fn poll_settlement(&self, state: &mut MarketState, now: DateTime<Utc>) -> Step {
        if !elapsed(state.last_settlement_poll, now, self.config.settlement_poll_interval) {
            return Step::Idle;
        }
        state.last_settlement_poll = Some(now);

        let since_close = now - state.close_time;
        if state.observed_result.is_none() && since_close > self.config.settlement_timeout {
            error!(
                ticker = %state.ticker,
                since_close_secs = since_close.num_seconds(),
                "settlement timeout, giving up without a record"
            );
            state.settled = true;
            return Step::Settled { won: None };
        }

        if state.observed_result.is_none() {
            match self.api.get_market(&state.ticker).await {
                Ok(market) => match market.settled_side() {
                    Some(result) => state.observed_result = Some(result),
                    None => {
                        debug!(
                            ticker = %state.ticker,
                            since_close_secs = since_close.num_seconds(),
                            "awaiting settlement"
                        );
                        return Step::Idle;
                    }
                },
                Err(e) => {
                    warn!(ticker = %state.ticker, err = %e, "settlement poll failed");
                    return Step::Idle;
                }
            }
        }

        let (Some(result), Some(entry)) = (state.observed_result, state.entry) else {
            return Step::Idle;
        };

        let won = entry.side == result;
        let pnl = compute_pnl(won, entry.price, entry.contracts, entry.fee_cents);
        let record = JournalRecord::Settlement(SettlementRecord {
            time: now,
            ticker: state.ticker.clone(),
            strike: state.strike.unwrap_or(0.0),
            won,
            pnl_cents: pnl,
            fee_cents: entry.fee_cents,
            side: entry.side,
            entry_price: entry.price,
            contracts: entry.contracts,
            result,
            dry_run: self.config.dry_run,
        });

        if let Err(e) = self.recorder.record(&record) {
            error!(ticker = %state.ticker, err = %e, "failed to record settlement, will retry");
            return Step::Idle;
        }

        info!(
            ticker = %state.ticker,
            side = %entry.side,
            result = %result,
            won,
            pnl_cents = pnl,
            entry = entry.price,
            contracts = entry.contracts,
            since_close_secs = since_close.num_seconds(),
            "settlement"
        );
        state.settled = true;
        Step::Settled { won: Some(won) }
    }

    async fn supervise_order(&self, state: &mut MarketState, now: DateTime<Utc>) {
        let Some(pending) = state.pending.clone() else {
            return;
        };
        if now - pending.placed_at < self.config.order_timeout {
            return;
        }

        let query = FillQuery::for_order(&state.ticker, &pending.order_id);
        let fills = match self.api.get_fills(&query).await {
            Ok(fills) => fills,
            Err(e) => {
                warn!(ticker = %state.ticker, err = %e, "fill check failed");
                return;
            }
        };

        state.pending = None;

        let Some((avg_price, filled)) = average_fill(&fills, None) else {
            match self.api.cancel_order(&pending.order_id).await {
                Ok(()) => info!(ticker = %state.ticker, order_id = %pending.order_id, "order cancelled, unfilled at timeout"),
                Err(e) => warn!(ticker = %state.ticker, err = %e, "order cancel failed"),
            }
            return;
        };

        let fee = taker_fee(filled, avg_price);
        state.entry = Some(Entry {
            side: pending.side,
            price: avg_price,
            contracts: filled,
            fee_cents: fee,
        });

        info!(
            ticker = %state.ticker,
            side = %pending.side,
            avg_price,
            filled,
            "order filled"
        );
        self.record_trade(TradeRecord {
            time: now,
            ticker: state.ticker.clone(),
            side: pending.side,
            action: "buy".to_string(),
            price: avg_price,
            quantity: filled,
            fee_cents: fee,
            order_id: pending.order_id,
            filled,
            dry_run: false,
            limit_price: pending.limit_price,
        });
    }

    /// Marks the market evaluated once strike and a two-sided book are
    /// available. Returns the signal, if any.
    fn evaluate(&self, state: &mut MarketState, now: DateTime<Utc>) -> Option<Signal> {
        let secs_to_close = state.seconds_to_close(now);

        if state.strike.is_none() {
            warn!(ticker = %state.ticker, "evaluation deferred, strike not available");
            return None;
        }
        let Some((yes_bid, yes_ask)) = self.books.top_of_book(&state.ticker) else {
            warn!(ticker = %state.ticker, "evaluation deferred, order book not available");
            return None;
        };

        state.evaluated = true;
        info!(
            ticker = %state.ticker,
            yes_bid,
            yes_ask,
            no_ask = 100 - yes_bid,
            secs_to_close,
            "evaluating order book"
        );

        match evaluate_signal(yes_bid, yes_ask) {
            Some(signal) => {
                info!(
                    ticker = %state.ticker,
                    side = %signal.side,
                    limit_price = signal.limit_price,
                    reference_ask = signal.reference_ask,
                    strike = ?state.strike,
                    "signal detected"
                );
                Some(signal)
            }
            None => {
                info!(ticker = %state.ticker, yes_ask, no_ask = 100 - yes_bid, "no signal");
                None
            }
        }
    }

    async fn place_order(&self, state: &mut MarketState, signal: Signal, balance: i64, now: DateTime<Utc>) {
        let contracts = kelly_size(signal.limit_price, balance);
        if contracts == 0 {
            info!(
                ticker = %state.ticker,
                side = %signal.side,
                limit_price = signal.limit_price,
                balance,
                "sizing says no trade"
            );
            return;
        }

        if self.config.dry_run {
            let fee = taker_fee(contracts, signal.limit_price);
            state.entry = Some(Entry {
                side: signal.side,
                price: signal.limit_price,
                contracts,
                fee_cents: fee,
            });
            info!(
                ticker = %state.ticker,
                side = %signal.side,
                price = signal.limit_price,
                contracts,
                fee,
                balance,
                "dry-run trade"
            );
            self.record_trade(TradeRecord {
                time: now,
                ticker: state.ticker.clone(),
                side: signal.side,
                action: "buy".to_string(),
                price: signal.limit_price,
                quantity: contracts,
                fee_cents: fee,
                order_id: DRY_RUN_ORDER_ID.to_string(),
                filled: contracts,
                dry_run: true,
                limit_price: signal.limit_price,
            });
            return;
        }

        let request = OrderRequest::limit_buy(&state.ticker, signal.side, contracts, signal.limit_price);
        match self.api.create_order(&request).await {
            Ok(order) => {
                info!(
                    ticker = %state.ticker,
                    order_id = %order.order_id,
                    side = %signal.side,
                    price = signal.limit_price,
                    contracts,
                    "order placed"
                );
                state.pending = Some(PendingOrder {
                    order_id: order.order_id,
                    placed_at: now,
                    side: signal.side,
                    limit_price: signal.limit_price,
                    contracts,
                });
            }
            Err(e) => error!(ticker = %state.ticker, err = %e, "order placement failed"),
        }
    }

    // A failed trade record is logged only; the position itself is tracked
    // in memory and its settlement is still recorded.
    fn record_trade(&self, trade: TradeRecord) {
        let ticker = trade.ticker.clone();
        if let Err(e) = self.recorder.record(&JournalRecord::Trade(trade)) {
            error!(ticker = %ticker, err = %e, "failed to record trade");
        }
    }

    /// Rebuilds the entry for a pre-existing position from its buy fills.
    pub async fn reconstruct_entry(&self, ticker: &str, side: Side, contracts: i64) -> Entry {
        let (price, fee_cents) = match self.api.get_fills(&FillQuery::for_ticker(ticker)).await {
            Ok(fills) => match average_fill(&fills, Some(side)) {
                Some((avg, _)) => (avg, taker_fee(contracts, avg)),
                None => (0, 0),
            },
            Err(e) => {
                warn!(ticker = %ticker, err = %e, "failed to get fills for reconciliation");
                (0, 0)
            }
        };
        Entry {
            side,
            price,
            contracts,
            fee_cents,
        }
    }
}

/// Quantity-weighted average price (integer division) and total quantity of
/// buy fills, optionally restricted to one side. `None` when nothing filled.
pub(super) fn average_fill(fills: &[Fill], side: Option<Side>) -> Option<(i64, i64)> {
    let (cost, quantity) = fills
        .iter()
        .filter(|f| f.action.is_empty() || f.action == "buy")
        .filter(|f| side.map_or(true, |s| f.side == s.as_str()))
        .fold((0i64, 0i64), |(cost, qty), f| {
            (cost + f.count * f.price_for_side(), qty + f.count)
        });

    if quantity > 0 {
        Some((cost / quantity, quantity))
    } else {
        None
    }
}

/// True when no previous event exists or at least `interval` has passed.
pub(super) fn elapsed(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: chrono::Duration) -> bool {
    last.map_or(true, |t| now - t >= interval)
}
