//! Open position as reported by the brokerage position listing.

use serde::{Deserialize, Serialize};

/// Direction of an order or position, matching the wire values
/// (`"Buy"` / `"Sell"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "Buy"),
            OrderSide::Sell => write!(f, "Sell"),
        }
    }
}

/// One open position. Rebuilt from scratch on every poll; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Contract symbol (e.g., "MNQZ4")
    pub symbol: String,

    /// Signed contract count
    pub quantity: i64,

    /// Direction of the position
    pub side: OrderSide,
}

impl Position {
    /// Create a position record.
    pub fn new(symbol: impl Into<String>, quantity: i64, side: OrderSide) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            side,
        }
    }
}
