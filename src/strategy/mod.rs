//! Quantitative primitives for the 15-minute entry strategy.
//!
//! Everything here is a pure function over integer cents: no state, no I/O.
//! The engine calls these once per market when its entry window opens.

mod signal;
mod sizing;

pub use signal::{evaluate_signal, in_entry_window, Signal, ENTRY_WINDOW_SECS, SIGNAL_THRESHOLD};
pub use sizing::{compute_pnl, kelly_size, taker_fee, ASSUMED_WIN_RATE, KELLY_FRACTION};
