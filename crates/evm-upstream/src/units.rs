//! Decimal amount conversion.

use alloy::primitives::U256;
use alloy::primitives::utils::{format_units, parse_units};

use crate::error::{EvmError, Result};

/// Parse a decimal string such as `"1000.5"` into base units.
pub fn parse_amount(value: &str, decimals: u8) -> Result<u128> {
    let trimmed = value.trim();
    let invalid = |reason: &str| EvmError::InvalidAmount {
        value: value.to_string(),
        reason: reason.to_string(),
    };
    if trimmed.starts_with('-') {
        return Err(invalid("must not be negative"));
    }
    let parsed = parse_units(trimmed, decimals).map_err(|e| invalid(&e.to_string()))?;
    let base: U256 = parsed.get_absolute();
    u128::try_from(base).map_err(|_| invalid("too large"))
}

/// Format base units as a decimal string without trailing zeros.
pub fn format_amount(amount: u128, decimals: u8) -> String {
    match format_units(U256::from(amount), decimals) {
        Ok(formatted) => trim_fraction(formatted),
        Err(_) => amount.to_string(),
    }
}

fn trim_fraction(formatted: String) -> String {
    if !formatted.contains('.') {
        return formatted;
    }
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1000", 6).unwrap(), 1_000_000_000);
        assert_eq!(parse_amount("0.5", 6).unwrap(), 500_000);
        assert_eq!(parse_amount(" 100000 ", 6).unwrap(), 100_000_000_000);
        assert!(parse_amount("-1", 6).is_err());
        assert!(parse_amount("abc", 6).is_err());
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(1_000_000_000, 6), "1000");
        assert_eq!(format_amount(1_500_000, 6), "1.5");
        assert_eq!(format_amount(0, 6), "0");
        assert_eq!(format_amount(42, 0), "42");
    }
}
