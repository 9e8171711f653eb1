//! Entry signal and entry window.

use crate::types::Side;

/// Minimum ask (in cents) on either outcome before we take the trade.
pub const SIGNAL_THRESHOLD: i64 = 80;

/// Entry window length: the last four minutes before close.
pub const ENTRY_WINDOW_SECS: i64 = 240;

/// An actionable entry: buy `side` with a limit at `limit_price`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    pub side: Side,
    /// Limit price in cents.
    pub limit_price: i64,
    /// The ask that triggered the signal.
    pub reference_ask: i64,
}

/// Decides which outcome (if any) to buy given the YES top of book.
///
/// The NO ask is derived as `100 - yes_bid`. When both outcomes clear the
/// threshold the YES side wins. Limits sit at the ask so the order crosses
/// immediately.
pub fn evaluate_signal(yes_bid: i64, yes_ask: i64) -> Option<Signal> {
    if yes_ask >= SIGNAL_THRESHOLD {
        return Some(Signal {
            side: Side::Yes,
            limit_price: yes_ask,
            reference_ask: yes_ask,
        });
    }

    let no_ask = 100 - yes_bid;
    if no_ask >= SIGNAL_THRESHOLD {
        return Some(Signal {
            side: Side::No,
            limit_price: no_ask,
            reference_ask: no_ask,
        });
    }

    None
}

/// True iff `0 < secs_to_close <= 240`.
pub fn in_entry_window(secs_to_close: i64) -> bool {
    secs_to_close > 0 && secs_to_close <= ENTRY_WINDOW_SECS
}
