//! Per-market trading state.
//!
//! Only the engine mutates a `MarketState`. Fields are visible inside the
//! engine module and nowhere else; everything outside gets read-only
//! getters through `&MarketState`:
//!
//! ```compile_fail
//! fn force_trade(state: &kalshi_bot::engine::MarketState) {
//!     state.evaluated = true;
//! }
//! ```

use chrono::{DateTime, Utc};

use crate::types::Side;

/// Entry taken on a market, filled or simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub side: Side,
    /// Average fill price in cents.
    pub price: i64,
    pub contracts: i64,
    pub fee_cents: i64,
}

/// Resting order awaiting its fill check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOrder {
    pub order_id: String,
    pub placed_at: DateTime<Utc>,
    pub side: Side,
    pub limit_price: i64,
    pub contracts: i64,
}

/// Coarse lifecycle position, derived from the state flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketPhase {
    Discovered,
    StrikeKnown,
    /// Evaluated without a resulting position.
    NoTrade,
    OrderPending,
    Filled,
    AwaitingSettlement,
    Settled,
}

#[derive(Debug, Clone)]
pub struct MarketState {
    pub(super) ticker: String,
    pub(super) close_time: DateTime<Utc>,
    pub(super) strike: Option<f64>,
    pub(super) last_strike_poll: Option<DateTime<Utc>>,
    pub(super) subscribed: bool,
    pub(super) evaluated: bool,
    pub(super) entry: Option<Entry>,
    pub(super) pending: Option<PendingOrder>,
    pub(super) settled: bool,
    pub(super) last_settlement_poll: Option<DateTime<Utc>>,
    /// Outcome seen on a settlement poll whose record has not yet been written.
    pub(super) observed_result: Option<Side>,
}

impl MarketState {
    pub(super) fn discovered(ticker: &str, close_time: DateTime<Utc>, strike: Option<f64>) -> Self {
        Self {
            ticker: ticker.to_string(),
            close_time,
            strike,
            last_strike_poll: None,
            subscribed: false,
            evaluated: false,
            entry: None,
            pending: None,
            settled: false,
            last_settlement_poll: None,
            observed_result: None,
        }
    }

    /// State for a position that existed before this process started.
    pub(super) fn reconciled(
        ticker: &str,
        close_time: DateTime<Utc>,
        strike: Option<f64>,
        entry: Entry,
    ) -> Self {
        Self {
            evaluated: true,
            entry: Some(entry),
            ..Self::discovered(ticker, close_time, strike)
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn close_time(&self) -> DateTime<Utc> {
        self.close_time
    }

    pub fn strike(&self) -> Option<f64> {
        self.strike
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    pub fn is_traded(&self) -> bool {
        self.entry.is_some()
    }

    pub fn entry(&self) -> Option<&Entry> {
        self.entry.as_ref()
    }

    pub fn pending_order(&self) -> Option<&PendingOrder> {
        self.pending.as_ref()
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    pub fn observed_result(&self) -> Option<Side> {
        self.observed_result
    }

    /// Whole seconds until close; negative once closed.
    pub fn seconds_to_close(&self, now: DateTime<Utc>) -> i64 {
        (self.close_time - now).num_seconds()
    }

    pub fn is_closed(&self, now: DateTime<Utc>) -> bool {
        now >= self.close_time
    }

    pub fn phase(&self, now: DateTime<Utc>) -> MarketPhase {
        if self.settled {
            MarketPhase::Settled
        } else if self.entry.is_some() {
            if self.is_closed(now) {
                MarketPhase::AwaitingSettlement
            } else {
                MarketPhase::Filled
            }
        } else if self.pending.is_some() {
            MarketPhase::OrderPending
        } else if self.evaluated {
            MarketPhase::NoTrade
        } else if self.strike.is_some() {
            MarketPhase::StrikeKnown
        } else {
            MarketPhase::Discovered
        }
    }
}
