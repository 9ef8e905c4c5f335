//! Broker wire payloads.
//!
//! Explicit schemas for the two channels. Both sides of the broker
//! validate against these structs: unknown fields, missing required
//! fields, or out-of-vocabulary enum strings fail deserialization at
//! the boundary instead of leaking into the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::order::{
    EventStatus, OrderCommand, OrderEvent, OrderSide, OrderType,
};
use crate::domain::errors::ValidationError;

/// Payload on the command channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OrderCommandMessage {
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl OrderCommandMessage {
    pub fn from_command(command: &OrderCommand) -> Self {
        Self {
            order_id: command.order_id.clone(),
            user_id: command.user_id.clone(),
            symbol: command.symbol.clone(),
            side: command.side,
            order_type: command.order_type,
            quantity: command.quantity.value(),
            price: command.price.map(|p| p.value()),
            timestamp: command.created_at,
        }
    }

    /// Rebuild the validated domain command. Re-runs intent validation,
    /// so a payload that skipped the submission path is still checked.
    pub fn to_command(&self) -> Result<OrderCommand, ValidationError> {
        OrderCommand::new(
            self.order_id.clone(),
            self.user_id.clone(),
            self.symbol.clone(),
            self.side,
            self.order_type,
            self.quantity,
            self.price,
        )
    }
}

/// Payload on the event channel, also pushed verbatim to sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OrderEventMessage {
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    pub status: EventStatus,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OrderEventMessage {
    pub fn from_event(event: &OrderEvent) -> Self {
        Self {
            order_id: event.order_id.clone(),
            user_id: event.user_id.clone(),
            status: event.status,
            symbol: event.symbol.clone(),
            side: event.side,
            quantity: event.quantity,
            price: event.price,
            timestamp: event.timestamp,
            error: event.error.clone(),
        }
    }
}
