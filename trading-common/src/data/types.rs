// trading-common/src/data/types.rs
// Typed market data: order books, candles and fills.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while turning raw exchange values into typed market data
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Invalid number in field '{field}': '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Invalid order book: {0}")]
    InvalidBook(String),

    #[error("Invalid candle: {0}")]
    InvalidCandle(String),

    #[error("Invalid fill: {0}")]
    InvalidFill(String),
}

pub type DataResult<T> = Result<T, DataError>;

/// Parses a non-empty numeric string into a Decimal.
///
/// Accepts plain and scientific notation (`"1e-5"`), rejects empty or
/// whitespace-only input.
pub fn parse_decimal(field: &'static str, value: &str) -> DataResult<Decimal> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DataError::InvalidNumber {
            field,
            value: value.to_string(),
        });
    }

    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| DataError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

// =================================================================
// Order Book
// =================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "B")]
    Bid,
    #[serde(rename = "A")]
    Ask,
}

impl Side {
    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Bid)
    }
}

impl FromStr for Side {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "B" => Ok(Side::Bid),
            "A" => Ok(Side::Ask),
            other => Err(DataError::InvalidFill(format!("unknown side '{}'", other))),
        }
    }
}

/// One aggregated price level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub px: Decimal,
    pub sz: Decimal,
    /// Number of resting orders at this level
    pub n: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L2Book {
    pub coin: String,
    pub time: u64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

impl L2Book {
    pub fn best_bid(&self) -> Option<&Level> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&Level> {
        self.asks.first()
    }

    /// Mid price, if both sides are populated
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid()?.px;
        let ask = self.best_ask()?.px;
        Some((bid + ask) / Decimal::from(2))
    }

    /// Relative spread `(ask - bid) / mid`
    pub fn spread(&self) -> Option<Decimal> {
        let mid = self.mid_price()?;
        if mid.is_zero() {
            return None;
        }
        let bid = self.best_bid()?.px;
        let ask = self.best_ask()?.px;
        Some((ask - bid) / mid)
    }
}

// =================================================================
// Candles
// =================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub coin: Option<String>,
    pub interval: Option<String>,
    /// Open time in milliseconds
    pub timestamp: u64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Checks OHLC ordering and a non-negative volume.
    pub fn validate(&self) -> DataResult<()> {
        if self.high < self.open || self.high < self.close || self.high < self.low {
            return Err(DataError::InvalidCandle(format!(
                "high {} below open {} / close {} / low {}",
                self.high, self.open, self.close, self.low
            )));
        }
        if self.low > self.open || self.low > self.close {
            return Err(DataError::InvalidCandle(format!(
                "low {} above open {} / close {}",
                self.low, self.open, self.close
            )));
        }
        if self.volume < Decimal::ZERO {
            return Err(DataError::InvalidCandle(format!(
                "negative volume {}",
                self.volume
            )));
        }
        Ok(())
    }
}

// =================================================================
// Fills
// =================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub coin: String,
    pub px: Decimal,
    pub sz: Decimal,
    pub side: Side,
    pub time: u64,
    /// Direction label as reported by the exchange ("Open Long", "Close Short", ...)
    pub dir: String,
    pub closed_pnl: Decimal,
    pub fee: Decimal,
    pub oid: u64,
    pub start_position: Option<Decimal>,
    pub hash: Option<String>,
    pub crossed: Option<bool>,
    pub tid: Option<u64>,
    pub fee_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFills {
    pub user: Option<String>,
    /// First message after subscribing carries the recent history
    pub is_snapshot: bool,
    pub fills: Vec<Fill>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            coin: Some("BTC".to_string()),
            interval: Some("1m".to_string()),
            timestamp: 1,
            open,
            high,
            low,
            close,
            volume: dec!(100),
        }
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("px", "101.5").unwrap(), dec!(101.5));
        assert_eq!(parse_decimal("px", "1e-3").unwrap(), dec!(0.001));
        assert!(parse_decimal("px", "").is_err());
        assert!(parse_decimal("px", "  ").is_err());
        assert!(parse_decimal("px", "abc").is_err());
    }

    #[test]
    fn test_candle_ordering() {
        assert!(candle(dec!(10), dec!(12), dec!(9), dec!(11)).validate().is_ok());
        assert!(candle(dec!(10), dec!(10), dec!(10), dec!(10)).validate().is_ok());
        // high below open
        assert!(candle(dec!(10), dec!(5), dec!(1), dec!(8)).validate().is_err());
        // low above close
        assert!(candle(dec!(10), dec!(12), dec!(9.5), dec!(9)).validate().is_err());
    }

    #[test]
    fn test_book_mid_and_spread() {
        let book = L2Book {
            coin: "ETH".to_string(),
            time: 0,
            bids: vec![Level { px: dec!(99), sz: dec!(1), n: 1 }],
            asks: vec![Level { px: dec!(101), sz: dec!(2), n: 3 }],
        };
        assert_eq!(book.mid_price(), Some(dec!(100)));
        assert_eq!(book.spread(), Some(dec!(0.02)));

        let empty = L2Book { coin: "ETH".to_string(), time: 0, bids: vec![], asks: vec![] };
        assert_eq!(empty.mid_price(), None);
    }

    #[test]
    fn test_side_parsing() {
        assert_eq!("B".parse::<Side>().unwrap(), Side::Bid);
        assert_eq!("A".parse::<Side>().unwrap(), Side::Ask);
        assert!("X".parse::<Side>().is_err());
    }

    #[test]
    fn test_side_wire_letters() {
        assert_eq!(serde_json::from_str::<Side>("\"B\"").unwrap(), Side::Bid);
        assert_eq!(serde_json::to_string(&Side::Ask).unwrap(), "\"A\"");
        assert!(serde_json::from_str::<Side>("\"buy\"").is_err());
    }
}
