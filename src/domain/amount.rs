//! Conversion between human decimal token amounts ("0.1") and integer token units.

use alloy::primitives::U256;
use alloy::primitives::utils::{format_units, parse_units};

use super::error::ValidationError;

/// Precision used when adding human amounts without knowing the token.
pub const MAX_TOKEN_DECIMALS: u8 = 18;

/// Parse a non-negative decimal string into integer units for a token with `decimals`.
///
/// Rejects empty strings, signs, exponents and more fractional digits than the
/// token supports.
pub fn to_units(amount: &str, decimals: u8) -> Result<U256, ValidationError> {
    let trimmed = amount.trim();
    let invalid = || ValidationError::InvalidAmount(amount.to_string());

    if trimmed.is_empty() {
        return Err(invalid());
    }
    let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }
    if fraction.len() > decimals as usize {
        return Err(invalid());
    }

    let normalized = match (whole.is_empty(), fraction.is_empty()) {
        (true, _) => format!("0.{fraction}"),
        (false, true) => whole.to_string(),
        (false, false) => format!("{whole}.{fraction}"),
    };
    parse_units(&normalized, decimals)
        .map(|parsed| parsed.get_absolute())
        .map_err(|_| invalid())
}

/// Format integer units as a trimmed decimal string ("0.1", "12", "0").
#[must_use]
pub fn from_units(units: U256, decimals: u8) -> String {
    let formatted = format_units(units, decimals).unwrap_or_else(|_| units.to_string());
    normalize(&formatted)
}

/// Add two human amounts exactly.
pub fn add(a: &str, b: &str) -> Result<String, ValidationError> {
    let sum = to_units(a, MAX_TOKEN_DECIMALS)?.saturating_add(to_units(b, MAX_TOKEN_DECIMALS)?);
    Ok(from_units(sum, MAX_TOKEN_DECIMALS))
}

/// What is left of `limit` after `spent`, floored at zero.
pub fn headroom(limit: &str, spent: &str) -> Result<String, ValidationError> {
    let left = to_units(limit, MAX_TOKEN_DECIMALS)?
        .saturating_sub(to_units(spent, MAX_TOKEN_DECIMALS)?);
    Ok(from_units(left, MAX_TOKEN_DECIMALS))
}

/// Strip trailing fractional zeros ("0.100" -> "0.1", "5.000" -> "5").
#[must_use]
pub fn normalize(value: &str) -> String {
    if !value.contains('.') {
        return value.to_string();
    }
    let trimmed = value.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headroom_floors_at_zero() {
        assert_eq!(headroom("10", "0.1").unwrap(), "9.9");
        assert_eq!(headroom("0.3", "0.3").unwrap(), "0");
        assert_eq!(headroom("1", "2.5").unwrap(), "0");
        assert!(headroom("x", "1").is_err());
    }

    #[test]
    fn test_to_units_scales_by_decimals() {
        assert_eq!(to_units("0.1", 6).unwrap(), U256::from(100_000u64));
        assert_eq!(to_units("10", 6).unwrap(), U256::from(10_000_000u64));
        assert_eq!(to_units(".5", 2).unwrap(), U256::from(50u64));
        assert_eq!(to_units("1.", 2).unwrap(), U256::from(100u64));
        assert_eq!(
            to_units("1", 18).unwrap(),
            U256::from(1_000_000_000_000_000_000u128)
        );
    }

    #[test]
    fn test_to_units_rejects_garbage() {
        for bad in ["", " ", ".", "-1", "+1", "1e6", "0.1234567", "abc", "1.2.3"] {
            assert!(to_units(bad, 6).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_from_units_trims_trailing_zeros() {
        assert_eq!(from_units(U256::from(100_000u64), 6), "0.1");
        assert_eq!(from_units(U256::from(10_000_000u64), 6), "10");
        assert_eq!(from_units(U256::ZERO, 6), "0");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("0.100000000000000000"), "0.1");
        assert_eq!(normalize("5.000"), "5");
        assert_eq!(normalize("120"), "120");
        assert_eq!(normalize("0.0"), "0");
    }

    #[test]
    fn test_add_is_exact() {
        assert_eq!(add("0", "0.1").unwrap(), "0.1");
        assert_eq!(add("0.1", "0.2").unwrap(), "0.3");
        assert_eq!(add("9.95", "0.05").unwrap(), "10");
    }
}
