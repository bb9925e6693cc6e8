//! Kelly criterion bet sizing.
//!
//! Computes a stake for a parlay using fractional Kelly with a bankroll cap,
//! then applies a correlation penalty when legs are not independent.

use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::types::ParlayError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Kelly sizing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KellyConfig {
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly). Lower = more conservative.
    pub multiplier: f64,
    /// Maximum bet as a fraction of bankroll.
    pub max_bet_fraction: f64,
    /// Factor applied to the stake when any correlation warning exists.
    pub correlation_penalty: f64,
    /// Half-width of the suggested range around the recommendation.
    pub range_spread: f64,
    /// Smallest stake worth placing.
    pub min_stake_unit: Decimal,
    /// Raw Kelly above this is aggressive.
    pub aggressive_threshold: f64,
    /// Raw Kelly at or above this is moderate.
    pub moderate_threshold: f64,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            multiplier: 0.25,           // Quarter-Kelly
            max_bet_fraction: 0.05,     // Max 5% of bankroll per parlay
            correlation_penalty: 0.5,   // Halve correlated parlays
            range_spread: 0.5,          // ±50%
            min_stake_unit: dec!(1.00),
            aggressive_threshold: 0.10,
            moderate_threshold: 0.03,
        }
    }
}

// ---------------------------------------------------------------------------
// Recommendation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Conservative,
    Moderate,
    Aggressive,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Conservative => write!(f, "conservative"),
            RiskLevel::Moderate => write!(f, "moderate"),
            RiskLevel::Aggressive => write!(f, "aggressive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetSizingRecommendation {
    pub min_bet: Decimal,
    pub max_bet: Decimal,
    pub recommended_bet: Decimal,
    /// Full (unscaled) Kelly fraction.
    pub kelly_fraction: f64,
    /// Bankroll fraction actually recommended, after multiplier, cap and penalty.
    pub applied_fraction: f64,
    /// `None` when there is no positive-EV bet.
    pub risk_level: Option<RiskLevel>,
    pub reasoning: Vec<String>,
}

impl BetSizingRecommendation {
    fn no_bet(kelly_fraction: f64, reasoning: Vec<String>) -> Self {
        Self {
            min_bet: Decimal::ZERO,
            max_bet: Decimal::ZERO,
            recommended_bet: Decimal::ZERO,
            kelly_fraction,
            applied_fraction: 0.0,
            risk_level: None,
            reasoning,
        }
    }

    pub fn has_bet(&self) -> bool {
        self.recommended_bet > Decimal::ZERO
    }
}

/// Full Kelly fraction `f* = (b·p − q) / b` with `b = decimal − 1`.
pub fn kelly_fraction(decimal_odds: f64, probability: f64) -> f64 {
    let b = decimal_odds - 1.0;
    if b <= 0.0 {
        return 0.0;
    }
    (b * probability - (1.0 - probability)) / b
}

// ---------------------------------------------------------------------------
// Sizer
// ---------------------------------------------------------------------------

pub struct BetSizer {
    config: KellyConfig,
}

impl BetSizer {
    pub fn new(config: KellyConfig) -> Self {
        Self { config }
    }

    /// Access the Kelly configuration.
    pub fn config(&self) -> &KellyConfig {
        &self.config
    }

    /// Recommend a stake for a parlay.
    ///
    /// Order: full Kelly × multiplier, then the bankroll cap, then the
    /// correlation penalty. A non-positive EV or Kelly fraction yields a zero
    /// bet with no risk level.
    pub fn recommend(
        &self,
        decimal_odds: f64,
        true_probability: f64,
        bankroll: Decimal,
        expected_value_percent: f64,
        correlation_warning_count: usize,
    ) -> Result<BetSizingRecommendation, ParlayError> {
        if !(0.0..=1.0).contains(&true_probability) {
            return Err(ParlayError::InvalidProbability(true_probability));
        }
        if !decimal_odds.is_finite() || decimal_odds <= 1.0 {
            return Err(ParlayError::InvalidDecimalOdds(decimal_odds));
        }

        let kelly = kelly_fraction(decimal_odds, true_probability);

        if expected_value_percent <= 0.0 || kelly <= 0.0 {
            debug!(
                ev = format!("{:.2}%", expected_value_percent),
                raw_kelly = format!("{:.2}%", kelly * 100.0),
                "No positive-EV bet"
            );
            return Ok(BetSizingRecommendation::no_bet(
                kelly,
                vec![format!(
                    "No positive-EV bet: expected value {:.2}%, Kelly fraction {:.2}%",
                    expected_value_percent,
                    kelly * 100.0
                )],
            ));
        }

        if bankroll <= Decimal::ZERO {
            return Ok(BetSizingRecommendation::no_bet(
                kelly,
                vec![format!("Bankroll {bankroll} leaves nothing to stake")],
            ));
        }

        let mut reasoning = vec![format!(
            "Expected value {:.2}% at decimal odds {:.2} with win probability {:.2}%",
            expected_value_percent,
            decimal_odds,
            true_probability * 100.0
        )];

        let risk_level = self.risk_level(kelly);

        // Fractional Kelly
        let fractional = kelly * self.config.multiplier;
        reasoning.push(format!(
            "Full Kelly {:.2}% scaled by {} to {:.2}% of bankroll",
            kelly * 100.0,
            self.config.multiplier,
            fractional * 100.0
        ));

        // Cap
        let mut applied = fractional.min(self.config.max_bet_fraction);
        if applied < fractional {
            reasoning.push(format!(
                "Capped at {:.2}% of bankroll",
                self.config.max_bet_fraction * 100.0
            ));
        }

        // Correlation penalty
        if correlation_warning_count > 0 {
            applied *= self.config.correlation_penalty;
            reasoning.push(format!(
                "{} correlation warning(s): stake reduced by factor {}",
                correlation_warning_count, self.config.correlation_penalty
            ));
        }

        let recommended_bet = fraction_of(bankroll, applied);
        let cap_amount = fraction_of(bankroll, self.config.max_bet_fraction);
        let min_bet = fraction_of(recommended_bet, 1.0 - self.config.range_spread)
            .max(self.config.min_stake_unit);
        let max_bet = fraction_of(recommended_bet, 1.0 + self.config.range_spread)
            .min(cap_amount)
            .max(min_bet);

        if recommended_bet < self.config.min_stake_unit {
            reasoning.push(format!(
                "Recommended stake is below the minimum stake unit of {}",
                self.config.min_stake_unit
            ));
        }
        reasoning.push(format!("Risk level: {risk_level}"));

        debug!(
            raw_kelly = format!("{:.2}%", kelly * 100.0),
            applied = format!("{:.2}%", applied * 100.0),
            recommended = %recommended_bet,
            %risk_level,
            "Bet sized"
        );

        Ok(BetSizingRecommendation {
            min_bet,
            max_bet,
            recommended_bet,
            kelly_fraction: kelly,
            applied_fraction: applied,
            risk_level: Some(risk_level),
            reasoning,
        })
    }

    /// Classify a raw Kelly fraction.
    pub fn risk_level(&self, kelly: f64) -> RiskLevel {
        if kelly > self.config.aggressive_threshold {
            RiskLevel::Aggressive
        } else if kelly >= self.config.moderate_threshold {
            RiskLevel::Moderate
        } else {
            RiskLevel::Conservative
        }
    }
}

/// `amount × fraction` at full precision. Non-representable fractions give zero.
fn fraction_of(amount: Decimal, fraction: f64) -> Decimal {
    Decimal::from_f64(fraction)
        .and_then(|f| amount.checked_mul(f))
        .unwrap_or(Decimal::ZERO)
        .max(Decimal::ZERO)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
