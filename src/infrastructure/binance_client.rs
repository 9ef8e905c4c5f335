//! Binance order placement client.
//!
//! Builds signed requests for the Binance order endpoint and normalizes
//! responses into [`ExecutionOutcome`]s. The signature is an HMAC-SHA256
//! over the exact serialized query string, so parameter order matters:
//! `symbol, side, type, quantity, timestamp[, price, timeInForce]` —
//! insertion order, never alphabetical. The API key travels in the
//! `X-MBX-APIKEY` header.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::domain::entities::order::{EventStatus, OrderCommand, OrderType};
use crate::domain::repositories::exchange_client::{ExchangeClient, ExecutionOutcome};

/// Binance spot testnet base URL, the default execution target.
const BINANCE_TESTNET_BASE: &str = "https://testnet.binance.vision";

const ORDER_PATH: &str = "/api/v3/order";

type HmacSha256 = Hmac<Sha256>;

/// Binance client configuration.
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub api_base: String,
    /// Bound on the whole order call; a timeout settles as REJECTED.
    pub timeout: Duration,
}

impl BinanceConfig {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_base: api_base.into(),
            timeout,
        }
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_base: BINANCE_TESTNET_BASE.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Order placement response. Only the fields the pipeline interprets.
#[derive(Debug, Deserialize)]
struct BinanceOrderResponse {
    status: String,
    #[serde(default)]
    fills: Vec<BinanceFill>,
}

#[derive(Debug, Deserialize)]
struct BinanceFill {
    price: String,
}

/// Error body returned by Binance on failed requests.
#[derive(Debug, Deserialize)]
struct BinanceErrorResponse {
    msg: String,
}

pub struct BinanceClient {
    client: Client,
    config: BinanceConfig,
}

impl BinanceClient {
    pub fn new(config: BinanceConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// Serialize order parameters in the fixed signing order.
    ///
    /// The signature is computed over this exact string; any reordering
    /// breaks verification against the exchange.
    fn canonical_query(order: &OrderCommand, timestamp_ms: i64) -> String {
        let mut params: Vec<(&str, String)> = vec![
            ("symbol", order.symbol.clone()),
            ("side", order.side.to_string()),
            ("type", order.order_type.to_string()),
            ("quantity", order.quantity.value().to_string()),
            ("timestamp", timestamp_ms.to_string()),
        ];

        if matches!(order.order_type, OrderType::Limit) {
            if let Some(price) = order.price {
                params.push(("price", price.value().to_string()));
                params.push(("timeInForce", "GTC".to_string()));
            }
        }

        params
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// HMAC-SHA256 over the query string, hex-encoded.
    fn sign(query: &str, api_secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(api_secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn interpret_status(status: &str) -> EventStatus {
        match status {
            "FILLED" => EventStatus::Filled,
            "PARTIALLY_FILLED" => EventStatus::PartiallyFilled,
            _ => EventStatus::Rejected,
        }
    }

    async fn try_submit(
        &self,
        api_key: &str,
        api_secret: &str,
        order: &OrderCommand,
    ) -> Result<ExecutionOutcome, String> {
        let timestamp_ms = Utc::now().timestamp_millis();
        let query = Self::canonical_query(order, timestamp_ms);
        let signature = Self::sign(&query, api_secret);

        let url = format!(
            "{}{}?{}&signature={}",
            self.config.api_base, ORDER_PATH, query, signature
        );

        debug!(order_id = %order.order_id, symbol = %order.symbol, "Placing order");

        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("Exchange call timed out after {:?}", self.config.timeout)
                } else {
                    format!("Exchange call failed: {}", e)
                }
            })?;

        if !response.status().is_success() {
            let http_status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<BinanceErrorResponse>(&body)
                .map(|e| e.msg)
                .unwrap_or_else(|_| format!("HTTP {}: {}", http_status, body));
            return Err(message);
        }

        let order_response: BinanceOrderResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse order response: {}", e))?;

        let status = Self::interpret_status(&order_response.status);

        // Realized price: first reported fill, falling back to the
        // requested price (MARKET orders carry no price of their own).
        let fill_price = order_response
            .fills
            .first()
            .and_then(|fill| fill.price.parse::<f64>().ok())
            .or_else(|| order.price.map(|p| p.value()));

        let error = match status {
            EventStatus::Rejected => Some(format!(
                "Unexpected exchange order status: {}",
                order_response.status
            )),
            _ => None,
        };

        Ok(ExecutionOutcome {
            status,
            fill_price,
            error,
        })
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn name(&self) -> &str {
        "Binance"
    }

    async fn submit_order(
        &self,
        api_key: &str,
        api_secret: &str,
        order: &OrderCommand,
    ) -> ExecutionOutcome {
        match self.try_submit(api_key, api_secret, order).await {
            Ok(outcome) => outcome,
            Err(message) => {
                warn!(order_id = %order.order_id, error = %message, "Order rejected");
                ExecutionOutcome::rejected(message)
            }
        }
    }
}
