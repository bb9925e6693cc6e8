//! Parlay combination.
//!
//! A parlay pays the product of its legs' decimal odds; its implied
//! probability is the product of the legs' implied probabilities.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use super::odds::{to_american, to_decimal, to_implied_probability};
use crate::types::{Leg, ParlayError};

/// Leg-count limits for a pricable parlay.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ParlayConfig {
    pub min_legs: usize,
    pub max_legs: usize,
}

impl Default for ParlayConfig {
    fn default() -> Self {
        Self {
            min_legs: 2,
            max_legs: 15,
        }
    }
}

impl ParlayConfig {
    /// Check a leg count against the configured limits.
    pub fn validate_leg_count(&self, count: usize) -> Result<(), ParlayError> {
        if count < self.min_legs {
            return Err(ParlayError::InsufficientLegs {
                min: self.min_legs,
                actual: count,
            });
        }
        if count > self.max_legs {
            return Err(ParlayError::TooManyLegs {
                max: self.max_legs,
                actual: count,
            });
        }
        Ok(())
    }
}

/// Combined price of a set of legs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CombinedOdds {
    pub total_decimal_odds: f64,
    pub total_american_odds: i64,
    pub implied_probability: f64,
    pub leg_count: usize,
}

impl CombinedOdds {
    /// The all-zero result for an empty leg set.
    pub fn empty() -> Self {
        Self {
            total_decimal_odds: 0.0,
            total_american_odds: 0,
            implied_probability: 0.0,
            leg_count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.leg_count == 0
    }

    /// Total return (stake included) if every leg wins. Unrounded; round
    /// when displaying.
    pub fn payout(&self, stake: Decimal) -> Result<Decimal, ParlayError> {
        let odds = Decimal::from_f64(self.total_decimal_odds)
            .ok_or(ParlayError::OddsOverflow(self.total_decimal_odds))?;
        stake
            .checked_mul(odds)
            .ok_or(ParlayError::OddsOverflow(self.total_decimal_odds))
    }

    /// Net winnings if every leg wins.
    pub fn profit(&self, stake: Decimal) -> Result<Decimal, ParlayError> {
        if self.is_empty() {
            return Ok(Decimal::ZERO);
        }
        Ok(self.payout(stake)? - stake)
    }
}

/// Combine a set of American prices into one parlay price.
///
/// An empty slice yields [`CombinedOdds::empty`]. Leg-count limits are not
/// enforced here; see [`ParlayConfig::validate_leg_count`].
pub fn combine_odds(odds: &[i32]) -> Result<CombinedOdds, ParlayError> {
    if odds.is_empty() {
        return Ok(CombinedOdds::empty());
    }

    let mut total_decimal = 1.0;
    let mut implied = 1.0;
    for &price in odds {
        total_decimal *= to_decimal(price)?;
        implied *= to_implied_probability(price)?;
    }

    Ok(CombinedOdds {
        total_decimal_odds: total_decimal,
        total_american_odds: to_american(total_decimal)?,
        implied_probability: implied,
        leg_count: odds.len(),
    })
}

/// Combine legs at their chosen quotes.
pub fn combine(legs: &[Leg]) -> Result<CombinedOdds, ParlayError> {
    let odds: Vec<i32> = legs.iter().map(Leg::american_odds).collect();
    combine_odds(&odds)
}
