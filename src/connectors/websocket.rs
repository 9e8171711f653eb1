//! Kalshi WebSocket transport and wire types.
//!
//! The handshake is authenticated with the same signed headers as REST,
//! signed over `GET /trade-api/ws/v2`. After connecting, the client sends
//! `orderbook_delta` subscriptions and receives `{"type", "msg"}` envelopes.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::types::Side;

use super::auth::{ApiCredentials, AuthError};

/// Path signed during the WebSocket handshake.
pub const WS_SIGN_PATH: &str = "/trade-api/ws/v2";

/// Channel carrying snapshots and deltas.
pub const ORDERBOOK_CHANNEL: &str = "orderbook_delta";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum WebSocketError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("No message within {0}s")]
    ReadTimeout(u64),

    #[error("Connection closed by server: {0}")]
    ConnectionClosed(String),

    #[error("Handshake signing failed: {0}")]
    Auth(#[from] AuthError),
}

/// Connects to the Kalshi WebSocket endpoint with signed handshake headers.
pub async fn connect(url: &str, credentials: &ApiCredentials) -> Result<WsStream, WebSocketError> {
    info!(url = %url, "connecting to Kalshi WebSocket");

    let mut request = url
        .into_client_request()
        .map_err(|e| WebSocketError::ConnectionFailed(e.to_string()))?;

    for (name, value) in credentials.auth_headers("GET", WS_SIGN_PATH)? {
        let value = HeaderValue::from_str(&value)
            .map_err(|e| WebSocketError::ConnectionFailed(e.to_string()))?;
        request
            .headers_mut()
            .insert(HeaderName::from_static(header_key(name)), value);
    }

    let (stream, _response) = connect_async(request)
        .await
        .map_err(|e| WebSocketError::ConnectionFailed(e.to_string()))?;

    info!("Kalshi WebSocket connected");
    Ok(stream)
}

// `HeaderName::from_static` requires lowercase.
fn header_key(name: &'static str) -> &'static str {
    match name {
        super::auth::HEADER_ACCESS_KEY => "kalshi-access-key",
        super::auth::HEADER_ACCESS_TIMESTAMP => "kalshi-access-timestamp",
        _ => "kalshi-access-signature",
    }
}

// ============ Message Types ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeCommand {
    pub id: u64,
    pub cmd: &'static str,
    pub params: SubscribeParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeParams {
    pub channels: Vec<&'static str>,
    pub market_tickers: Vec<String>,
}

impl SubscribeCommand {
    /// Order book subscription for the given tickers.
    pub fn orderbook(id: u64, tickers: Vec<String>) -> Self {
        Self {
            id,
            cmd: "subscribe",
            params: SubscribeParams {
                channels: vec![ORDERBOOK_CHANNEL],
                market_tickers: tickers,
            },
        }
    }

    pub fn to_json(&self) -> Result<String, WebSocketError> {
        serde_json::to_string(self).map_err(|e| WebSocketError::SendFailed(e.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    msg: serde_json::Value,
}

/// Book snapshot. Level pairs that are not two integers are dropped here
/// rather than failing the whole message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SnapshotMessage {
    pub market_ticker: String,
    #[serde(default, deserialize_with = "lenient_levels")]
    pub yes: Option<Vec<Vec<i64>>>,
    #[serde(default, deserialize_with = "lenient_levels")]
    pub no: Option<Vec<Vec<i64>>>,
}

fn lenient_levels<'de, D>(deserializer: D) -> Result<Option<Vec<Vec<i64>>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| match value {
        serde_json::Value::Array(pairs) => Some(pairs.iter().filter_map(level_pair).collect()),
        _ => None,
    }))
}

fn level_pair(value: &serde_json::Value) -> Option<Vec<i64>> {
    let pair = value.as_array()?;
    Some(vec![pair.first()?.as_i64()?, pair.get(1)?.as_i64()?])
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeltaMessage {
    pub market_ticker: String,
    pub price: i64,
    pub delta: i64,
    pub side: Side,
}

/// Parsed inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Snapshot(SnapshotMessage),
    Delta(DeltaMessage),
    Subscribed,
    Error(String),
    Other(String),
}

impl WsMessage {
    /// Parses a text frame. Unknown message types are returned as `Other`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let message = match envelope.kind.as_str() {
            "orderbook_snapshot" => WsMessage::Snapshot(serde_json::from_value(envelope.msg)?),
            "orderbook_delta" => WsMessage::Delta(serde_json::from_value(envelope.msg)?),
            "subscribed" => WsMessage::Subscribed,
            "error" => WsMessage::Error(envelope.msg.to_string()),
            other => {
                debug!(kind = other, "unhandled WebSocket message type");
                WsMessage::Other(other.to_string())
            }
        };
        Ok(message)
    }

    pub fn market_ticker(&self) -> Option<&str> {
        match self {
            WsMessage::Snapshot(s) => Some(&s.market_ticker),
            WsMessage::Delta(d) => Some(&d.market_ticker),
            _ => None,
        }
    }
}
