//! Order submission and read service.
//!
//! The surface exposed to the HTTP layer: validate and record an order
//! intent, hand it to the broker for asynchronous execution, and serve
//! the pull-based views (orders with their latest event, derived
//! positions) that connecting clients read before live events arrive.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::messages::OrderCommandMessage;
use crate::domain::entities::order::{OrderCommand, OrderSide, OrderStatus, OrderType};
use crate::domain::entities::position::Position;
use crate::domain::errors::ValidationError;
use crate::domain::services::position_aggregator::compute_positions;
use crate::infrastructure::broker::{Broker, BrokerError, COMMAND_CHANNEL};
use crate::persistence::models::{OrderEventRecord, OrderWithLatestEvent};
use crate::persistence::repository::{CommandRepository, EventRepository};
use crate::persistence::DatabaseError;

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Order already exists: {0}")]
    DuplicateOrder(String),

    #[error("Failed to persist order: {0}")]
    Store(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl From<DatabaseError> for SubmissionError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::DuplicateOrder(id) => SubmissionError::DuplicateOrder(id),
            other => SubmissionError::Store(other.to_string()),
        }
    }
}

/// Order submission request, as received from the HTTP layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub quantity: f64,
    #[serde(default)]
    pub price: Option<f64>,
}

/// Synchronous acknowledgment: the command is durable and PENDING.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOrderResponse {
    #[serde(rename = "orderId")]
    pub order_id: String,
    pub status: OrderStatus,
}

pub struct OrderService {
    commands: CommandRepository,
    events: EventRepository,
    broker: Arc<Broker>,
}

impl OrderService {
    pub fn new(commands: CommandRepository, events: EventRepository, broker: Arc<Broker>) -> Self {
        Self {
            commands,
            events,
            broker,
        }
    }

    /// Validate, durably record, and dispatch an order intent.
    ///
    /// Validation failures reject the request before any command is
    /// created. Once this returns, the caller holds a PENDING order and
    /// learns the outcome via events or polling, never synchronously.
    pub async fn submit_order(
        &self,
        user_id: &str,
        request: CreateOrderRequest,
    ) -> Result<SubmitOrderResponse, SubmissionError> {
        let order_id = Uuid::new_v4().to_string();
        let command = OrderCommand::new(
            order_id.clone(),
            user_id.to_string(),
            request.symbol,
            request.side,
            request.order_type,
            request.quantity,
            request.price,
        )?;

        self.commands.create(&command).await?;

        let message = OrderCommandMessage::from_command(&command);
        let payload = serde_json::to_string(&message)
            .map_err(|e| SubmissionError::Store(e.to_string()))?;

        // The command is durable even if dispatch fails; it stays
        // PENDING until a worker picks it up on resubmission.
        if let Err(e) = self.broker.publish(COMMAND_CHANNEL, payload) {
            warn!(%order_id, "Command recorded but dispatch failed: {}", e);
        }

        info!(%order_id, user_id, "Order submitted");
        Ok(SubmitOrderResponse {
            order_id,
            status: OrderStatus::Pending,
        })
    }

    /// A user's commands, most recent first, each with its latest event.
    pub async fn list_orders(
        &self,
        user_id: &str,
    ) -> Result<Vec<OrderWithLatestEvent>, DatabaseError> {
        let commands = self.commands.list_by_user(user_id).await?;
        let events = self.events.list_by_user(user_id).await?;

        let mut events_by_order: HashMap<String, OrderEventRecord> = HashMap::new();
        for event in events {
            events_by_order.insert(event.order_id.clone(), event);
        }

        Ok(commands
            .into_iter()
            .map(|command| {
                let latest_event = events_by_order.remove(&command.order_id);
                OrderWithLatestEvent {
                    command,
                    latest_event,
                }
            })
            .collect())
    }

    /// Current derived positions for a user.
    pub async fn list_positions(&self, user_id: &str) -> Result<Vec<Position>, DatabaseError> {
        let records = self.events.list_filled_by_user(user_id).await?;
        let events = records
            .iter()
            .map(|record| record.to_event())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(compute_positions(&events))
    }
}
