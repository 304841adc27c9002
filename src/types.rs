// src/types.rs
use crate::error::{ExchangeError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignalType {
    #[default]
    Undefined,
    Buy,
    Sell,
    Hold,
}

impl SignalType {
    /// The side that unwinds `self`. `Undefined` and `Hold` map to themselves.
    pub fn opposite(self) -> Self {
        match self {
            SignalType::Buy => SignalType::Sell,
            SignalType::Sell => SignalType::Buy,
            other => other,
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalType::Undefined => "undefined",
            SignalType::Buy => "buy",
            SignalType::Sell => "sell",
            SignalType::Hold => "hold",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64, // ms
    pub close_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Exchange-owned position snapshot. Read fresh on every request.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionDetails {
    pub size: Decimal,
    pub entry_price: Decimal,
    pub side: SignalType,
}

impl PositionDetails {
    pub fn is_open(&self) -> bool {
        !self.size.is_zero() && self.side != SignalType::Undefined
    }
}

/// Single-use websocket credential from the bullet endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct BulletToken {
    pub endpoint: String,
    pub token: String,
    pub ping_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfitCheck {
    pub take_profit: bool,
    pub ratio: Decimal,
}

impl ProfitCheck {
    /// `(mark - entry) / entry` compared against `target`.
    pub fn evaluate(mark_price: Decimal, entry_price: Decimal, target: Decimal) -> Result<Self> {
        let ratio = profit_ratio(mark_price, entry_price)?;
        Ok(Self {
            take_profit: ratio >= target,
            ratio,
        })
    }
}

pub fn profit_ratio(mark_price: Decimal, entry_price: Decimal) -> Result<Decimal> {
    (mark_price - entry_price)
        .checked_div(entry_price)
        .ok_or_else(|| ExchangeError::Domain(format!("cannot compute ratio for entry price {}", entry_price)))
}
