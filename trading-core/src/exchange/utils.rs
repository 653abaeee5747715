// exchange/utils.rs
// Utility functions for Hyperliquid wire values

use super::ExchangeError;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

/// Significant figures allowed in a perp price
const PRICE_SIG_FIGS: u32 = 5;
/// Price decimals + size decimals may not exceed this for perps
const MAX_PERP_DECIMALS: u32 = 6;

/// Validate symbol format for Hyperliquid. Case is preserved (`kPEPE`).
pub fn validate_hyperliquid_symbol(symbol: &str) -> Result<String, ExchangeError> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(ExchangeError::InvalidSymbol(
            "Symbol cannot be empty".to_string(),
        ));
    }

    if !symbol.chars().all(char::is_alphanumeric) {
        return Err(ExchangeError::InvalidSymbol(format!(
            "Symbol '{}' contains invalid characters",
            symbol
        )));
    }

    if symbol.len() > 12 {
        return Err(ExchangeError::InvalidSymbol(format!(
            "Symbol '{}' has invalid length",
            symbol
        )));
    }

    Ok(symbol.to_string())
}

/// Client order id: 0x + 32 hex chars
pub fn validate_cloid(cloid: &str) -> Result<(), ExchangeError> {
    let hex_part = cloid.strip_prefix("0x").unwrap_or("");
    if hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(ExchangeError::ParseError(format!(
            "Invalid client order id '{}': expected 0x + 16 bytes hex",
            cloid
        )))
    }
}

/// Canonical wire string: no trailing zeros, no exponent ("1.50" → "1.5")
pub fn format_decimal(value: Decimal) -> String {
    let normalized = value.normalize();
    if normalized.is_zero() {
        "0".to_string()
    } else {
        normalized.to_string()
    }
}

/// Rounds a size to the asset's size decimals
pub fn round_size(size: Decimal, sz_decimals: u32) -> Decimal {
    size.round_dp_with_strategy(sz_decimals, RoundingStrategy::ToZero)
}

/// Rounds a perp price to 5 significant figures and at most
/// `6 - sz_decimals` decimals. Integer prices are always valid.
pub fn round_price(price: Decimal, sz_decimals: u32) -> Decimal {
    if price.fract().is_zero() {
        return price;
    }
    let max_dp = MAX_PERP_DECIMALS.saturating_sub(sz_decimals);
    price
        .round_sf(PRICE_SIG_FIGS)
        .unwrap_or(price)
        .round_dp(max_dp)
}

/// Aggressive limit price for a market order: `mid * (1 ± slippage)`
pub fn slippage_price(mid: Decimal, is_buy: bool, slippage: Decimal) -> Decimal {
    if is_buy {
        mid * (Decimal::ONE + slippage)
    } else {
        mid * (Decimal::ONE - slippage)
    }
}

/// Parse price string to Decimal
pub fn parse_price(price_str: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(price_str.trim())
        .map_err(|e| ExchangeError::ParseError(format!("Invalid price '{}': {}", price_str, e)))
}

/// Parse size/quantity string to Decimal
pub fn parse_size(size_str: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(size_str.trim())
        .map_err(|e| ExchangeError::ParseError(format!("Invalid size '{}': {}", size_str, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_symbol_validation() {
        assert!(validate_hyperliquid_symbol("BTC").is_ok());
        assert_eq!(validate_hyperliquid_symbol(" kPEPE ").unwrap(), "kPEPE");
        assert!(validate_hyperliquid_symbol("").is_err());
        assert!(validate_hyperliquid_symbol("BTC-USD").is_err());
    }

    #[test]
    fn test_cloid_validation() {
        assert!(validate_cloid("0x1234567890abcdef1234567890abcdef").is_ok());
        assert!(validate_cloid("1234567890abcdef1234567890abcdef").is_err());
        assert!(validate_cloid("0x1234").is_err());
        assert!(validate_cloid("0xzz34567890abcdef1234567890abcdef").is_err());
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(dec!(1.50)), "1.5");
        assert_eq!(format_decimal(dec!(100)), "100");
        assert_eq!(format_decimal(dec!(0.000)), "0");
        assert_eq!(format_decimal(dec!(42000.10)), "42000.1");
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_size(dec!(0.123456), 3), dec!(0.123));
        assert_eq!(round_size(dec!(1.9999), 0), dec!(1));

        assert_eq!(round_price(dec!(42000), 5), dec!(42000));
        assert_eq!(round_price(dec!(42123.456), 5), dec!(42123));
        assert_eq!(round_price(dec!(1.234567), 2), dec!(1.2346));
        assert_eq!(round_price(dec!(0.0123456), 0), dec!(0.012346));
    }

    #[test]
    fn test_slippage_price() {
        assert_eq!(slippage_price(dec!(100), true, dec!(0.05)), dec!(105));
        assert_eq!(slippage_price(dec!(100), false, dec!(0.05)), dec!(95));
    }

    #[test]
    fn test_parse() {
        assert_eq!(parse_price("42000.5").unwrap(), dec!(42000.5));
        assert!(parse_size("abc").is_err());
    }
}
