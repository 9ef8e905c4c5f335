//! Domain error types.

use thiserror::Error;

/// Rejections raised synchronously at order submission, before any
/// command is created.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Quantity must be positive")]
    NonPositiveQuantity,

    #[error("Price must be positive")]
    NonPositivePrice,

    #[error("Value must be finite")]
    MustBeFinite,

    #[error("Limit orders must have a price")]
    LimitOrderWithoutPrice,

    #[error("Symbol must not be empty")]
    EmptySymbol,
}

/// Invalid order status transition.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Order {order_id} cannot transition from {from} to {to}")]
pub struct InvalidTransition {
    pub order_id: String,
    pub from: String,
    pub to: String,
}
