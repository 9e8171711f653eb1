//! Order book watcher for real-time book streaming.
//!
//! Owns the WebSocket connection and feeds the shared book store.
//! Handles:
//! - Connection lifecycle with a fixed reconnect delay
//! - Replaying the tracked subscription set on every connect
//! - Forwarding new subscriptions while connected
//! - Applying snapshots and deltas for tracked instruments only

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::book::{OrderBookStore, SubscriptionCommand, SubscriptionManager};
use crate::connectors::websocket::{self, SubscribeCommand, WsStream};
use crate::connectors::{ApiCredentials, WebSocketError, WsMessage};

/// Configuration for the order book watcher.
#[derive(Debug, Clone)]
pub struct OrderBookWatcherConfig {
    pub url: String,
    /// Wait before reconnecting after any connection failure.
    pub reconnect_delay: Duration,
    /// The connection is considered dead after this long without a frame.
    pub read_timeout: Duration,
}

impl OrderBookWatcherConfig {
    pub fn new(url: String) -> Self {
        Self {
            url,
            reconnect_delay: Duration::from_secs(2),
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of applying one inbound text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Snapshot,
    Delta,
    /// Message for an instrument we no longer track.
    Untracked,
    Ignored,
}

enum ConnectionEnd {
    Shutdown,
}

type WsSink = SplitSink<WsStream, Message>;

/// Streams order books for every tracked instrument.
pub struct OrderBookWatcher {
    config: OrderBookWatcherConfig,
    credentials: ApiCredentials,
    books: Arc<OrderBookStore>,
    subscriptions: Arc<SubscriptionManager>,
    next_command_id: u64,
}

impl OrderBookWatcher {
    pub fn new(
        config: OrderBookWatcherConfig,
        credentials: ApiCredentials,
        books: Arc<OrderBookStore>,
        subscriptions: Arc<SubscriptionManager>,
    ) -> Self {
        Self {
            config,
            credentials,
            books,
            subscriptions,
            next_command_id: 1,
        }
    }

    /// Runs until shutdown is signalled. Connection failures never escape;
    /// they are logged and the connection is retried.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("OrderBookWatcher starting");

        loop {
            match self.run_connection(&mut shutdown).await {
                Ok(ConnectionEnd::Shutdown) => {
                    self.subscriptions.detach();
                    break;
                }
                Err(e) => warn!(err = %e, "WebSocket connection ended"),
            }
            self.subscriptions.detach();

            info!(
                delay_ms = self.config.reconnect_delay.as_millis() as u64,
                "reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                _ = shutdown.recv() => break,
            }
        }

        info!("OrderBookWatcher stopped");
    }

    async fn run_connection(
        &mut self,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<ConnectionEnd, WebSocketError> {
        // The handshake can stall; stop waiting on shutdown or after the read timeout.
        let connect = tokio::time::timeout(
            self.config.read_timeout,
            websocket::connect(&self.config.url, &self.credentials),
        );
        let stream = tokio::select! {
            _ = shutdown.recv() => return Ok(ConnectionEnd::Shutdown),
            connected = connect => match connected {
                Ok(stream) => stream?,
                Err(_) => {
                    return Err(WebSocketError::ConnectionFailed(format!(
                        "handshake timed out after {}s",
                        self.config.read_timeout.as_secs()
                    )))
                }
            },
        };
        let (mut write, mut read) = stream.split();

        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        if let Some(SubscriptionCommand::Subscribe(tickers)) = self.subscriptions.attach(command_tx) {
            info!(markets = tickers.len(), "replaying subscriptions");
            self.send_subscribe(&mut write, tickers).await?;
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = write.close().await;
                    return Ok(ConnectionEnd::Shutdown);
                }

                Some(SubscriptionCommand::Subscribe(tickers)) = command_rx.recv() => {
                    self.send_subscribe(&mut write, tickers).await?;
                }

                frame = tokio::time::timeout(self.config.read_timeout, read.next()) => {
                    let msg = match frame {
                        Err(_) => {
                            return Err(WebSocketError::ReadTimeout(self.config.read_timeout.as_secs()))
                        }
                        Ok(None) => {
                            return Err(WebSocketError::ConnectionClosed("Stream ended".to_string()))
                        }
                        Ok(Some(Err(e))) => return Err(WebSocketError::ReceiveFailed(e.to_string())),
                        Ok(Some(Ok(msg))) => msg,
                    };

                    match msg {
                        Message::Text(text) => {
                            apply_text(&self.books, &self.subscriptions, &text);
                        }
                        Message::Ping(data) => {
                            write
                                .send(Message::Pong(data))
                                .await
                                .map_err(|e| WebSocketError::SendFailed(e.to_string()))?;
                        }
                        Message::Close(frame) => {
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .unwrap_or_else(|| "Unknown".to_string());
                            return Err(WebSocketError::ConnectionClosed(reason));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn send_subscribe(
        &mut self,
        write: &mut WsSink,
        tickers: Vec<String>,
    ) -> Result<(), WebSocketError> {
        let count = tickers.len();
        let command = SubscribeCommand::orderbook(self.next_command_id, tickers);
        self.next_command_id += 1;

        let json = command.to_json()?;
        debug!(command = %json, "sending subscription");
        write
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| WebSocketError::SendFailed(e.to_string()))?;
        info!(markets = count, "subscribed");
        Ok(())
    }
}

/// Applies one text frame to the book store.
///
/// Frames for instruments that are not tracked are dropped, so a book
/// removed at cleanup cannot be recreated by a late message.
pub fn apply_text(books: &OrderBookStore, subscriptions: &SubscriptionManager, text: &str) -> Applied {
    let message = match WsMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(err = %e, payload = %text, "dropping unparseable WebSocket message");
            return Applied::Ignored;
        }
    };

    if let Some(ticker) = message.market_ticker() {
        if !subscriptions.is_subscribed(ticker) {
            debug!(ticker = %ticker, "ignoring book message for untracked market");
            return Applied::Untracked;
        }
    }

    match message {
        WsMessage::Snapshot(snapshot) => {
            books.apply_snapshot(
                &snapshot.market_ticker,
                snapshot.yes.as_deref().unwrap_or(&[]),
                snapshot.no.as_deref().unwrap_or(&[]),
            );
            Applied::Snapshot
        }
        WsMessage::Delta(delta) => {
            books.apply_delta(&delta.market_ticker, delta.side, delta.price, delta.delta);
            Applied::Delta
        }
        WsMessage::Error(body) => {
            warn!(body = %body, "WebSocket error message");
            Applied::Ignored
        }
        WsMessage::Subscribed | WsMessage::Other(_) => Applied::Ignored,
    }
}

impl std::fmt::Debug for OrderBookWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBookWatcher")
            .field("url", &self.config.url)
            .field("tracked", &self.subscriptions.tracked().len())
            .field("connected", &self.subscriptions.is_connected())
            .finish()
    }
}
