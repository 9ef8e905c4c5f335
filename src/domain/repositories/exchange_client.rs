//! Exchange client trait.
//!
//! Seam between the execution worker and the concrete exchange. The
//! contract is deliberately total: executing an order always yields an
//! [`ExecutionOutcome`], never an error — transport failures, timeouts
//! and exchange-side rejections are all folded into a REJECTED outcome
//! by the implementation.

use async_trait::async_trait;

use crate::domain::entities::order::{EventStatus, OrderCommand};

/// Normalized result of one execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub status: EventStatus,
    /// Realized price: the first reported fill if present, otherwise the
    /// caller's requested price.
    pub fill_price: Option<f64>,
    /// Human-readable failure description, present for REJECTED outcomes.
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            status: EventStatus::Rejected,
            fill_price: None,
            error: Some(error.into()),
        }
    }
}

/// Executes signed order placements against an exchange.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Name of the exchange, for logs.
    fn name(&self) -> &str;

    /// Place the order with the user's credentials. Must not fail: every
    /// failure mode becomes a REJECTED outcome.
    async fn submit_order(
        &self,
        api_key: &str,
        api_secret: &str,
        order: &OrderCommand,
    ) -> ExecutionOutcome;
}
