//! Kalshi 15-minute binary contract trading bot.
//!
//! Trades short-horizon BTC binary markets: mirrors each market's order book
//! from the exchange stream, evaluates a single entry per market near close,
//! manages the resulting order, and records settlement P&L.
//!
//! # Architecture
//!
//! - **Book ingestion**: one task owns the WebSocket and writes the shared
//!   [`book::OrderBookStore`]
//! - **Engine**: one task ticks every second and owns every
//!   [`engine::MarketState`]; it reads books and calls the REST API
//! - **Subscriptions**: the engine records which markets need books; the
//!   ingestion task forwards and replays them on reconnect
//! - **Journal**: append-only JSON lines of session, trade and settlement
//!   records, the only output other tools consume
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use kalshi_bot::book::{OrderBookStore, SubscriptionManager};
//! use kalshi_bot::config::EngineConfig;
//! use kalshi_bot::connectors::{ApiCredentials, KalshiApiClient};
//! use kalshi_bot::engine::Engine;
//! use kalshi_bot::journal::Journal;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let credentials = ApiCredentials::from_key_file("key-id".into(), "./kalshi_private_key.pem")?;
//! let api = KalshiApiClient::new("https://demo-api.kalshi.co/trade-api/v2".into(), credentials)?;
//! let books = Arc::new(OrderBookStore::new());
//! let subscriptions = Arc::new(SubscriptionManager::new(books.clone()));
//! let journal = Journal::open("./journal.jsonl")?;
//!
//! let mut engine = Engine::new(
//!     EngineConfig::default(),
//!     Arc::new(api),
//!     books,
//!     subscriptions,
//!     Arc::new(journal),
//! );
//! let (_stop, shutdown) = tokio::sync::broadcast::channel(1);
//! engine.run(shutdown).await;
//! # Ok(())
//! # }
//! ```

pub mod book;
pub mod config;
pub mod connectors;
pub mod engine;
pub mod estimator;
pub mod journal;
pub mod strategy;
pub mod types;
pub mod utils;
pub mod watchers;

// Re-export commonly used types
pub use book::{OrderBookStore, SubscriptionManager};
pub use config::{BotConfig, EngineConfig, KalshiEnv};
pub use connectors::{ApiCredentials, KalshiApiClient, TradingApi};
pub use engine::{Engine, MarketPhase, MarketState};
pub use journal::{EventRecorder, Journal, JournalRecord};
pub use types::Side;
