use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Order direction as submitted to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// An open holding created by an accepted buy order.
///
/// `entry_price` starts as the *approximate* price (last observed market
/// price at submission time) and is overwritten with the confirmed fill
/// price when the matching execution notification arrives. Removal happens
/// optimistically when a sell order is accepted, not when its fill confirms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub name: String,
    pub quantity: i64,
    pub entry_price: i64,
    /// False until an execution notification confirmed the entry price.
    pub confirmed: bool,
}

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("invalid quantity: {0}")]
    InvalidQuantity(i64),
    #[error("invalid entry price: {0}")]
    InvalidEntryPrice(i64),
}

impl Position {
    pub fn new(
        symbol: impl Into<String>,
        name: impl Into<String>,
        quantity: i64,
        entry_price: i64,
    ) -> Result<Self, PositionError> {
        if quantity <= 0 {
            return Err(PositionError::InvalidQuantity(quantity));
        }
        if entry_price <= 0 {
            return Err(PositionError::InvalidEntryPrice(entry_price));
        }
        Ok(Self {
            symbol: symbol.into(),
            name: name.into(),
            quantity,
            entry_price,
            confirmed: false,
        })
    }

    /// Overwrite the approximate entry with the confirmed fill. This is the
    /// only path that establishes the true entry price.
    pub fn confirm_fill(&mut self, price: i64, quantity: i64) -> Result<(), PositionError> {
        if quantity <= 0 {
            return Err(PositionError::InvalidQuantity(quantity));
        }
        if price <= 0 {
            return Err(PositionError::InvalidEntryPrice(price));
        }
        self.entry_price = price;
        self.quantity = quantity;
        self.confirmed = true;
        Ok(())
    }

    /// Profit rate in percent against the current entry price (approximate
    /// until reconciled).
    pub fn profit_rate(&self, current_price: i64) -> f64 {
        if self.entry_price <= 0 {
            return 0.0;
        }
        (current_price - self.entry_price) as f64 / self.entry_price as f64 * 100.0
    }
}
