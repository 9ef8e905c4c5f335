//! Position aggregation over fill events.
//!
//! Folds a user's FILLED / PARTIALLY_FILLED events into per-symbol
//! positions. The accumulation is commutative and associative, so the
//! result does not depend on event arrival order.

use std::collections::HashMap;

use crate::domain::entities::order::{OrderEvent, OrderSide};
use crate::domain::entities::position::Position;

/// Positions with |quantity| at or below this threshold are dropped as
/// numerically zero.
const ZERO_POSITION_EPSILON: f64 = 1e-4;

#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    quantity: f64,
    cost: f64,
}

/// Fold fill events into positions, symbol by symbol.
///
/// Events with non-fill statuses must be filtered out by the caller (the
/// event store query only returns fills). An event without a price
/// contributes its quantity at zero cost.
pub fn compute_positions(events: &[OrderEvent]) -> Vec<Position> {
    let mut by_symbol: HashMap<String, Accumulator> = HashMap::new();

    for event in events {
        let signed = match event.side {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        };
        let acc = by_symbol.entry(event.symbol.clone()).or_default();
        acc.quantity += signed * event.quantity;
        acc.cost += signed * event.price.unwrap_or(0.0) * event.quantity;
    }

    let mut positions: Vec<Position> = by_symbol
        .into_iter()
        .filter(|(_, acc)| acc.quantity.abs() > ZERO_POSITION_EPSILON)
        .map(|(symbol, acc)| Position {
            symbol,
            quantity: acc.quantity,
            average_price: acc.cost / acc.quantity.abs(),
        })
        .collect();

    // Stable output order for API responses and tests.
    positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    positions
}
