//! Typed journal records. Each serializes to one JSON object tagged by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Side;

/// Order id written for simulated fills.
pub const DRY_RUN_ORDER_ID: &str = "dry-run";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalRecord {
    SessionStart(SessionStart),
    Trade(TradeRecord),
    Settlement(SettlementRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStart {
    pub time: DateTime<Utc>,
    pub dry_run: bool,
    pub env: String,
    pub balance_cents: i64,
}

/// A confirmed entry fill, real or simulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub time: DateTime<Utc>,
    pub ticker: String,
    pub side: Side,
    pub action: String,
    /// Average fill price in cents.
    pub price: i64,
    pub quantity: i64,
    pub fee_cents: i64,
    pub order_id: String,
    /// Contracts filled.
    pub filled: i64,
    pub dry_run: bool,
    pub limit_price: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub time: DateTime<Utc>,
    pub ticker: String,
    pub strike: f64,
    pub won: bool,
    pub pnl_cents: i64,
    pub fee_cents: i64,
    pub side: Side,
    pub entry_price: i64,
    pub contracts: i64,
    /// Exchange outcome, `"yes"` or `"no"`.
    pub result: Side,
    pub dry_run: bool,
}

impl JournalRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            JournalRecord::SessionStart(_) => "session_start",
            JournalRecord::Trade(_) => "trade",
            JournalRecord::Settlement(_) => "settlement",
        }
    }

    pub fn ticker(&self) -> Option<&str> {
        match self {
            JournalRecord::SessionStart(_) => None,
            JournalRecord::Trade(t) => Some(&t.ticker),
            JournalRecord::Settlement(s) => Some(&s.ticker),
        }
    }
}
