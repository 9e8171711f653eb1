//! REST API client for Kalshi.
//!
//! Provides access to:
//! - Market data: single market, market listing by series, order book
//! - Portfolio: balance, positions, fills
//! - Orders: create, cancel

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use crate::types::Side;

use super::auth::{ApiCredentials, AuthError};

/// Path prefix that is part of every signed REST path.
pub const API_PATH_PREFIX: &str = "/trade-api/v2";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Rate limited, retry after: {0}s")]
    RateLimited(u64),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
}

/// The exchange operations the engine depends on.
///
/// Every call may fail; callers log and retry on their own schedule.
#[async_trait]
pub trait TradingApi: Send + Sync {
    async fn get_market(&self, ticker: &str) -> Result<Market, ApiError>;
    async fn get_markets(&self, series_ticker: &str, status: &str) -> Result<Vec<Market>, ApiError>;
    async fn get_orderbook(&self, ticker: &str, depth: u32) -> Result<RestOrderbook, ApiError>;
    /// Available balance in cents.
    async fn get_balance(&self) -> Result<i64, ApiError>;
    async fn get_positions(&self) -> Result<Vec<Position>, ApiError>;
    async fn create_order(&self, request: &OrderRequest) -> Result<Order, ApiError>;
    async fn cancel_order(&self, order_id: &str) -> Result<(), ApiError>;
    async fn get_fills(&self, query: &FillQuery) -> Result<Vec<Fill>, ApiError>;
}

/// Kalshi REST client.
#[derive(Clone)]
pub struct KalshiApiClient {
    client: Client,
    base_url: String,
    credentials: ApiCredentials,
}

impl KalshiApiClient {
    /// `base_url` is the full REST root, e.g. `https://host/trade-api/v2`.
    pub fn new(base_url: String, credentials: ApiCredentials) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn signed(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let sign_path = format!("{}{}", API_PATH_PREFIX, path);
        let mut builder = self
            .client
            .request(method.clone(), &url)
            .header("Accept", "application/json");
        for (name, value) in self.credentials.auth_headers(method.as_str(), &sign_path)? {
            builder = builder.header(name, value);
        }
        debug!(method = %method, url = %url, "kalshi request");
        Ok(builder)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let request = self.signed(Method::GET, path)?.query(query);
        let body = Self::send(request).await?;
        parse_body(&body)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        payload: &B,
    ) -> Result<T, ApiError> {
        let request = self.signed(Method::POST, path)?.json(payload);
        let body = Self::send(request).await?;
        parse_body(&body)
    }

    async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let request = self.signed(Method::DELETE, path)?;
        Self::send(request).await?;
        Ok(())
    }

    async fn send(request: RequestBuilder) -> Result<String, ApiError> {
        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(ApiError::RateLimited(retry_after));
        }

        let body = response.text().await?;
        if !status.is_success() {
            error!(status = status.as_u16(), body = %body, "kalshi API error");
            return Err(ApiError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::ParseError(format!("{e} (body: {body})")))
}

#[async_trait]
impl TradingApi for KalshiApiClient {
    async fn get_market(&self, ticker: &str) -> Result<Market, ApiError> {
        let response: MarketResponse = self.get(&format!("/markets/{ticker}"), &[]).await?;
        Ok(response.market)
    }

    async fn get_markets(&self, series_ticker: &str, status: &str) -> Result<Vec<Market>, ApiError> {
        let mut query = vec![("limit", "200".to_string())];
        if !series_ticker.is_empty() {
            query.push(("series_ticker", series_ticker.to_string()));
        }
        if !status.is_empty() {
            query.push(("status", status.to_string()));
        }
        let response: MarketsResponse = self.get("/markets", &query).await?;
        Ok(response.markets)
    }

    async fn get_orderbook(&self, ticker: &str, depth: u32) -> Result<RestOrderbook, ApiError> {
        let mut query = Vec::new();
        if depth > 0 {
            query.push(("depth", depth.to_string()));
        }
        let response: OrderbookResponse = self
            .get(&format!("/markets/{ticker}/orderbook"), &query)
            .await?;
        Ok(response.orderbook)
    }

    async fn get_balance(&self) -> Result<i64, ApiError> {
        let response: BalanceResponse = self.get("/portfolio/balance", &[]).await?;
        Ok(response.balance)
    }

    async fn get_positions(&self) -> Result<Vec<Position>, ApiError> {
        let query = [("limit", "200".to_string())];
        let response: PositionsResponse = self.get("/portfolio/positions", &query).await?;
        Ok(response.market_positions)
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<Order, ApiError> {
        let response: OrderResponse = self.post("/portfolio/orders", request).await?;
        Ok(response.order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("/portfolio/orders/{order_id}")).await
    }

    async fn get_fills(&self, query: &FillQuery) -> Result<Vec<Fill>, ApiError> {
        let mut params = Vec::new();
        if let Some(ticker) = &query.ticker {
            params.push(("ticker", ticker.clone()));
        }
        if let Some(order_id) = &query.order_id {
            params.push(("order_id", order_id.clone()));
        }
        let response: FillsResponse = self.get("/portfolio/fills", &params).await?;
        Ok(response.fills)
    }
}

impl std::fmt::Debug for KalshiApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KalshiApiClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ============ Response Types ============

/// Market as returned by `/markets` and `/markets/{ticker}`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Market {
    pub ticker: String,
    pub event_ticker: String,
    pub title: String,
    pub status: String,
    pub yes_bid: i64,
    pub yes_ask: i64,
    pub no_bid: i64,
    pub no_ask: i64,
    pub floor_strike: Option<f64>,
    pub cap_strike: Option<f64>,
    pub close_time: String,
    pub open_time: String,
    pub expiration_time: String,
    /// Empty until settled, then `"yes"` or `"no"`.
    pub result: String,
    pub rules_primary: String,
}

impl Market {
    /// Strike: cap strike, else floor strike, else parsed from the rules text.
    pub fn strike_price(&self) -> Option<f64> {
        if let Some(cap) = self.cap_strike.filter(|v| *v > 0.0) {
            return Some(cap);
        }
        if let Some(floor) = self.floor_strike.filter(|v| *v > 0.0) {
            return Some(floor);
        }
        parse_strike_from_rules(&self.rules_primary)
    }

    /// Parses `close_time` (RFC 3339). `None` when absent or malformed.
    pub fn close_time_parsed(&self) -> Option<DateTime<Utc>> {
        if self.close_time.is_empty() {
            return None;
        }
        DateTime::parse_from_rfc3339(&self.close_time)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Settlement outcome, once the exchange has determined it.
    pub fn settled_side(&self) -> Option<Side> {
        if self.result.is_empty() {
            return None;
        }
        self.result.parse().ok()
    }
}

fn parse_strike_from_rules(rules: &str) -> Option<f64> {
    static STRIKE_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = STRIKE_RE
        .get_or_init(|| Regex::new(r"is at least \$?([\d,]+(?:\.\d+)?)").ok())
        .as_ref()?;
    let captured = re.captures(rules)?.get(1)?.as_str().replace(',', "");
    captured.parse::<f64>().ok().filter(|v| *v > 0.0)
}

/// REST order book. Levels are `[price, quantity]` pairs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RestOrderbook {
    #[serde(default)]
    pub yes: Option<Vec<Vec<i64>>>,
    #[serde(default)]
    pub no: Option<Vec<Vec<i64>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Position {
    pub ticker: String,
    pub market_exposure: i64,
    pub resting_orders_count: i64,
    pub total_traded: i64,
    pub realized_pnl: i64,
    /// Positive = YES contracts, negative = NO contracts.
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRequest {
    pub ticker: String,
    pub action: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: String,
    pub count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yes_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_price: Option<i64>,
    pub time_in_force: String,
}

impl OrderRequest {
    /// Good-till-cancelled limit buy of `count` contracts of `side`.
    pub fn limit_buy(ticker: &str, side: Side, count: i64, price_cents: i64) -> Self {
        let (yes_price, no_price) = match side {
            Side::Yes => (Some(price_cents), None),
            Side::No => (None, Some(price_cents)),
        };
        Self {
            ticker: ticker.to_string(),
            action: "buy".to_string(),
            side,
            order_type: "limit".to_string(),
            count,
            yes_price,
            no_price,
            time_in_force: "good_till_canceled".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Order {
    pub order_id: String,
    pub ticker: String,
    pub status: String,
    pub action: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub yes_price: i64,
    pub no_price: i64,
    pub remaining_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillQuery {
    pub ticker: Option<String>,
    pub order_id: Option<String>,
}

impl FillQuery {
    pub fn for_ticker(ticker: &str) -> Self {
        Self {
            ticker: Some(ticker.to_string()),
            order_id: None,
        }
    }

    pub fn for_order(ticker: &str, order_id: &str) -> Self {
        Self {
            ticker: Some(ticker.to_string()),
            order_id: Some(order_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Fill {
    pub fill_id: String,
    pub order_id: String,
    pub ticker: String,
    pub side: String,
    pub action: String,
    pub count: i64,
    pub yes_price: i64,
    pub no_price: i64,
    pub is_taker: bool,
    pub created_time: String,
}

impl Fill {
    /// Price paid from the perspective of the filled side.
    pub fn price_for_side(&self) -> i64 {
        if self.side == "yes" {
            self.yes_price
        } else {
            self.no_price
        }
    }
}

#[derive(Debug, Deserialize)]
struct MarketResponse {
    market: Market,
}

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    #[serde(default)]
    markets: Vec<Market>,
}

#[derive(Debug, Deserialize)]
struct OrderbookResponse {
    orderbook: RestOrderbook,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: i64,
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    #[serde(default)]
    market_positions: Vec<Position>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order: Order,
}

#[derive(Debug, Deserialize)]
struct FillsResponse {
    #[serde(default)]
    fills: Vec<Fill>,
}
