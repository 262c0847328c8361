//! Exact conversions between minor-unit integers and major-unit decimals.
//!
//! Balances never pass through floating point: a wei balance routinely needs
//! more than the 53 bits of an `f64` mantissa.

use primitive_types::U256;
use thiserror::Error;

/// `U256::MAX` has 78 decimal digits.
const MAX_POW10: usize = 77;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("amount must not be negative")]
    Negative,
    #[error("malformed amount `{0}`")]
    Malformed(String),
    #[error("amount has more than {decimals} fractional digits")]
    TooPrecise { decimals: u32 },
    #[error("amount overflows 256 bits")]
    Overflow,
}

/// Renders `value` minor units as a major-unit decimal with exactly
/// `decimals` fractional digits.
pub fn format_major_units(value: U256, decimals: u32) -> String {
    if decimals == 0 {
        return value.to_string();
    }
    let width = decimals as usize;
    let (whole, fraction) = value.div_mod(U256::exp10(width));
    format!("{whole}.{:0>width$}", fraction.to_string())
}

/// Parses a non-negative major-unit decimal (`"1"`, `"0.5"`, `"1e-8"`) into
/// minor units, rejecting anything that cannot be represented exactly.
pub fn parse_major_units(text: &str, decimals: u32) -> Result<U256, AmountError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AmountError::Empty);
    }
    if text.starts_with('-') {
        return Err(AmountError::Negative);
    }
    let unsigned = text.strip_prefix('+').unwrap_or(text);
    let malformed = || AmountError::Malformed(text.to_string());

    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(index) => {
            let exponent = unsigned[index + 1..]
                .parse::<i32>()
                .map_err(|_| malformed())?;
            (&unsigned[..index], exponent)
        }
        None => (unsigned, 0),
    };
    let (integer, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if integer.is_empty() && fraction.is_empty() {
        return Err(malformed());
    }
    if !integer
        .chars()
        .chain(fraction.chars())
        .all(|c| c.is_ascii_digit())
    {
        return Err(malformed());
    }

    let digits = format!("{integer}{fraction}");
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::zero());
    }

    let shift = i64::from(exponent) - fraction.len() as i64 + i64::from(decimals);
    if shift >= 0 {
        let shift = shift as usize;
        if shift > MAX_POW10 {
            return Err(AmountError::Overflow);
        }
        let base = U256::from_dec_str(digits).map_err(|_| AmountError::Overflow)?;
        base.checked_mul(U256::exp10(shift))
            .ok_or(AmountError::Overflow)
    } else {
        let cut = shift.unsigned_abs() as usize;
        if cut >= digits.len() {
            return Err(AmountError::TooPrecise { decimals });
        }
        let (kept, dropped) = digits.split_at(digits.len() - cut);
        if dropped.chars().any(|c| c != '0') {
            return Err(AmountError::TooPrecise { decimals });
        }
        U256::from_dec_str(kept).map_err(|_| AmountError::Overflow)
    }
}
