//! Order commands and execution events.
//!
//! An [`OrderCommand`] is a user's order intent, durably recorded before
//! execution is attempted. An [`OrderEvent`] is the recorded outcome of
//! attempting to execute a command against the exchange. A command's
//! status starts at `PENDING` and transitions exactly once to a terminal
//! value; the transition set is encoded in [`OrderStatus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{InvalidTransition, ValidationError};
use crate::domain::value_objects::{price::Price, quantity::Quantity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::StopMarket => write!(f, "STOP_MARKET"),
        }
    }
}

/// Command lifecycle status. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Filled,
    PartiallyFilled,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    /// The only allowed edges are `PENDING → <terminal>`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(self, OrderStatus::Pending) && next.is_terminal()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "PENDING"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderStatus::Rejected => write!(f, "REJECTED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "FILLED" => Ok(OrderStatus::Filled),
            "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(format!("Unknown order status: {}", other)),
        }
    }
}

/// Outcome status carried by an [`OrderEvent`]. Terminal by construction;
/// there is no `PENDING` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Filled,
    PartiallyFilled,
    Rejected,
    Cancelled,
}

impl From<EventStatus> for OrderStatus {
    fn from(status: EventStatus) -> Self {
        match status {
            EventStatus::Filled => OrderStatus::Filled,
            EventStatus::PartiallyFilled => OrderStatus::PartiallyFilled,
            EventStatus::Rejected => OrderStatus::Rejected,
            EventStatus::Cancelled => OrderStatus::Cancelled,
        }
    }
}

impl EventStatus {
    /// True for statuses that represent an actual fill.
    pub fn is_fill(&self) -> bool {
        matches!(self, EventStatus::Filled | EventStatus::PartiallyFilled)
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", OrderStatus::from(*self))
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FILLED" => Ok(EventStatus::Filled),
            "PARTIALLY_FILLED" => Ok(EventStatus::PartiallyFilled),
            "REJECTED" => Ok(EventStatus::Rejected),
            "CANCELLED" => Ok(EventStatus::Cancelled),
            other => Err(format!("Unknown event status: {}", other)),
        }
    }
}

/// A user's validated order intent. `order_id` is globally unique and is
/// the idempotency key for the whole pipeline.
#[derive(Debug, Clone)]
pub struct OrderCommand {
    pub order_id: String,
    pub user_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Quantity,
    pub price: Option<Price>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl OrderCommand {
    pub fn new(
        order_id: String,
        user_id: String,
        symbol: String,
        side: OrderSide,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
    ) -> Result<Self, ValidationError> {
        if symbol.trim().is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        let quantity = Quantity::new(quantity)?;
        let price = price.map(Price::new).transpose()?;

        if matches!(order_type, OrderType::Limit) && price.is_none() {
            return Err(ValidationError::LimitOrderWithoutPrice);
        }

        Ok(OrderCommand {
            order_id,
            user_id,
            symbol,
            side,
            order_type,
            quantity,
            price,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        })
    }

    /// Apply a terminal outcome. Fails if the command already settled.
    pub fn transition_to(&mut self, next: OrderStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                order_id: self.order_id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Execution outcome for one command. Append-only, written solely by the
/// execution worker.
#[derive(Debug, Clone)]
pub struct OrderEvent {
    pub order_id: String,
    pub user_id: String,
    pub status: EventStatus,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}
