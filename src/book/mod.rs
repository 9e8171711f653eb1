//! Live order book state.
//!
//! Two independently locked stores: the books themselves and the set of
//! instruments we want books for. The ingestion task writes books; the
//! engine reads them and drives subscriptions.

mod store;
mod subscriptions;

pub use store::{OrderBook, OrderBookStore, PriceLevel};
pub use subscriptions::{SubscriptionCommand, SubscriptionManager};
