//! Database models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::entities::order::{
    EventStatus, OrderCommand, OrderEvent, OrderSide, OrderStatus,
};
use crate::persistence::DatabaseError;

/// User credential row, owned by the identity subsystem. Both credential
/// fields are vault-sealed tokens, never plaintext.
#[derive(Debug, Clone, FromRow)]
pub struct UserCredentials {
    pub id: String,
    pub api_key_enc: String,
    pub api_secret_enc: String,
}

/// Order command row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderCommandRecord {
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub order_type: String,
    pub quantity: f64,
    pub price: Option<f64>,
    pub status: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl OrderCommandRecord {
    pub fn from_command(command: &OrderCommand) -> Self {
        Self {
            order_id: command.order_id.clone(),
            user_id: command.user_id.clone(),
            symbol: command.symbol.clone(),
            side: command.side.to_string(),
            order_type: command.order_type.to_string(),
            quantity: command.quantity.value(),
            price: command.price.map(|p| p.value()),
            status: command.status.to_string(),
            created_at: command.created_at,
        }
    }

    pub fn status(&self) -> Result<OrderStatus, DatabaseError> {
        self.status
            .parse()
            .map_err(|e: String| DatabaseError::QueryError(e))
    }
}

/// Order event row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderEventRecord {
    pub id: i64,
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub status: String,
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    pub price: Option<f64>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OrderEventRecord {
    /// Reconstruct the domain event. Fails on rows whose status or side
    /// strings do not parse (corrupt data).
    pub fn to_event(&self) -> Result<OrderEvent, DatabaseError> {
        let status: EventStatus = self
            .status
            .parse()
            .map_err(|e: String| DatabaseError::QueryError(e))?;
        let side = match self.side.as_str() {
            "BUY" => OrderSide::Buy,
            "SELL" => OrderSide::Sell,
            other => {
                return Err(DatabaseError::QueryError(format!(
                    "Unknown order side: {}",
                    other
                )))
            }
        };
        Ok(OrderEvent {
            order_id: self.order_id.clone(),
            user_id: self.user_id.clone(),
            status,
            symbol: self.symbol.clone(),
            side,
            quantity: self.quantity,
            price: self.price,
            timestamp: self.timestamp,
            error: self.error.clone(),
        })
    }
}

/// Command joined with its latest event, the order-listing read model.
#[derive(Debug, Clone, Serialize)]
pub struct OrderWithLatestEvent {
    #[serde(flatten)]
    pub command: OrderCommandRecord,
    #[serde(rename = "latestEvent")]
    pub latest_event: Option<OrderEventRecord>,
}
