//! Conversions between configured human amounts and on-chain base units

use crate::error::{ArbError, ArbResult};

use ethers::types::U256;
use ethers::utils::{format_units, parse_units};

/// Largest number of fractional digits carried through float conversions
pub const MAX_FRACTION_DIGITS: usize = 15;

/// Convert a human amount (e.g. `10000.5` tokens) into base units
pub fn to_base_units(amount: f64, decimals: u8) -> ArbResult<U256> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(ArbError::Amount(format!("{} is not a valid amount", amount)));
    }
    let digits = (decimals as usize).min(MAX_FRACTION_DIGITS);
    let text = format!("{:.*}", digits, amount);
    parse_units(&text, decimals as u32)
        .map(U256::from)
        .map_err(|e| ArbError::Amount(format!("{}: {}", text, e)))
}

/// Convert base units into a human amount, lossy beyond f64 precision
pub fn from_base_units(amount: U256, decimals: u8) -> f64 {
    format_units(amount, decimals as u32)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(f64::MAX)
}

/// One whole token in base units
pub fn one_token(decimals: u8) -> U256 {
    U256::exp10(decimals as usize)
}

/// Number of fractional digits in the shortest representation of `value`, capped
pub fn fraction_digits(value: f64) -> usize {
    let text = format!("{}", value);
    text.split_once('.')
        .map(|(_, frac)| frac.len().min(MAX_FRACTION_DIGITS))
        .unwrap_or(0)
}

/// Round to a number of decimal places
pub fn round_to(value: f64, places: usize) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// Scale a base-unit quantity by a float factor using basis-point precision
pub fn scale(value: U256, factor: f64) -> U256 {
    let bps = (factor * 10_000.0).round().max(0.0) as u64;
    value * U256::from(bps) / U256::from(10_000u64)
}
