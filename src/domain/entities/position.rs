//! Derived position view.

use serde::{Deserialize, Serialize};

/// Current holding in one symbol, derived from fill events. Quantity is
/// signed: buys accumulate positive, sells negative. Not persisted and
/// has no lifecycle of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    #[serde(rename = "averagePrice")]
    pub average_price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_serializes_average_price_camel_case() {
        let pos = Position {
            symbol: "BTCUSDT".to_string(),
            quantity: 1.5,
            average_price: 100.0,
        };
        let json = serde_json::to_value(&pos).unwrap();
        assert_eq!(json["averagePrice"], 100.0);
        assert_eq!(json["symbol"], "BTCUSDT");
    }
}
