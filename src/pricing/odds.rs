//! Conversions between American odds, decimal odds, and implied probability.
//!
//! American odds are the canonical integer form. Valid values satisfy
//! `|odds| >= 100`; anything in (-100, 100) is rejected.

use crate::types::ParlayError;

/// Reject American odds in the open interval (-100, 100).
pub fn validate_american(american: i32) -> Result<i32, ParlayError> {
    if american >= 100 || american <= -100 {
        Ok(american)
    } else {
        Err(ParlayError::InvalidOdds(american))
    }
}

/// American odds to decimal odds (total return per unit staked).
///
/// +150 → 2.50, -150 → 1.667
pub fn to_decimal(american: i32) -> Result<f64, ParlayError> {
    let odds = f64::from(validate_american(american)?);
    if odds > 0.0 {
        Ok(odds / 100.0 + 1.0)
    } else {
        Ok(100.0 / odds.abs() + 1.0)
    }
}

/// American odds to the implied probability (bookmaker margin included).
///
/// +150 → 0.40, -150 → 0.60
pub fn to_implied_probability(american: i32) -> Result<f64, ParlayError> {
    let odds = f64::from(validate_american(american)?);
    if odds > 0.0 {
        Ok(100.0 / (odds + 100.0))
    } else {
        let abs = odds.abs();
        Ok(abs / (abs + 100.0))
    }
}

/// Largest American price reported; beyond this `f64` no longer holds
/// whole numbers exactly.
const MAX_AMERICAN: f64 = 9_007_199_254_740_992.0;

/// Decimal odds back to American, rounded to the nearest integer.
///
/// Even money (2.0) maps to +100. Long parlays overflow `i32`, so the
/// result is `i64`; prices beyond 2^53 are an [`ParlayError::OddsOverflow`].
pub fn to_american(decimal: f64) -> Result<i64, ParlayError> {
    if !decimal.is_finite() || decimal <= 1.0 {
        return Err(ParlayError::InvalidDecimalOdds(decimal));
    }
    let american = if decimal >= 2.0 {
        ((decimal - 1.0) * 100.0).round()
    } else {
        (-100.0 / (decimal - 1.0)).round()
    };
    if american.abs() > MAX_AMERICAN {
        return Err(ParlayError::OddsOverflow(decimal));
    }
    Ok(american as i64)
}

/// Probability in the open interval (0, 1) to American odds.
pub fn probability_to_american(probability: f64) -> Result<i64, ParlayError> {
    if !probability.is_finite() || probability <= 0.0 || probability >= 1.0 {
        return Err(ParlayError::InvalidProbability(probability));
    }
    to_american(1.0 / probability)
}
