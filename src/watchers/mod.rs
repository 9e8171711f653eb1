//! Watcher subsystems for market monitoring.
//!
//! The order book watcher owns the live connection and keeps the shared
//! book store current for every tracked instrument.

mod orderbook_watcher;

pub use orderbook_watcher::{apply_text, Applied, OrderBookWatcher, OrderBookWatcherConfig};
