//! Connectors for the Kalshi APIs.
//!
//! Low-level REST and WebSocket clients plus request signing. Nothing here
//! holds trading state; the engine and the book watcher own that.

mod auth;
pub mod kalshi;
pub mod websocket;

pub use auth::{ApiCredentials, AuthError};
pub use kalshi::{
    ApiError, Fill, FillQuery, KalshiApiClient, Market, Order, OrderRequest, Position,
    RestOrderbook, TradingApi,
};
pub use websocket::{WebSocketError, WsMessage};
