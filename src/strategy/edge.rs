//! Expected-value detection.
//!
//! Removes the bookmaker margin from a market by normalising every side's
//! consensus implied probability ("de-vigging"), then compares the fair
//! probability with the best available price.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::optimizer::{consensus_probability, freshest_per_source, OptimizedLeg};
use crate::pricing::odds::{probability_to_american, to_decimal, validate_american};
use crate::pricing::parlay::CombinedOdds;
use crate::types::{EngineWarning, Leg, ModelEstimate, ParlayError, Quote, QuoteSnapshot};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Model estimates below this confidence fall back to the de-vigged price.
    pub min_estimate_confidence: f64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            min_estimate_confidence: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvResult {
    pub fair_probability: f64,
    pub implied_probability: f64,
    pub expected_value_percent: f64,
    pub has_edge: bool,
}

impl EvResult {
    pub fn new(fair_probability: f64, decimal_odds: f64) -> Self {
        let implied_probability = if decimal_odds > 0.0 {
            1.0 / decimal_odds
        } else {
            0.0
        };
        let expected_value_percent = expected_value_percent(fair_probability, decimal_odds);
        Self {
            fair_probability,
            implied_probability,
            expected_value_percent,
            has_edge: expected_value_percent > 0.0,
        }
    }
}

/// Where a leg's fair probability came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FairSource {
    /// Every side quoted; margin removed.
    Devigged,
    /// Only this side quoted; consensus implied probability, margin included.
    Consensus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegEv {
    pub leg_id: String,
    pub fair_source: FairSource,
    pub fair_american_odds: Option<i64>,
    pub ev: EvResult,
}

// ---------------------------------------------------------------------------
// Formulas
// ---------------------------------------------------------------------------

/// Normalise implied probabilities so they sum to 1.
///
/// Non-positive totals split the book evenly.
pub fn devig(implied: &[f64]) -> Vec<f64> {
    let total: f64 = implied.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        let even = 1.0 / implied.len().max(1) as f64;
        return vec![even; implied.len()];
    }
    implied.iter().map(|p| p / total).collect()
}

/// EV per unit staked, in percent: `(p × decimal − 1) × 100`.
pub fn expected_value_percent(fair_probability: f64, decimal_odds: f64) -> f64 {
    (fair_probability * decimal_odds - 1.0) * 100.0
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

pub struct EdgeDetector {
    config: EdgeConfig,
}

impl EdgeDetector {
    pub fn new(config: EdgeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    /// De-vigged probability of the leg's selection, or `None` when no other
    /// side of its market is quoted.
    pub fn fair_probability(&self, leg: &Leg, snapshot: &QuoteSnapshot) -> Option<f64> {
        let mut sides: BTreeMap<String, Vec<&Quote>> = snapshot.market_sides(leg);
        sides
            .entry(leg.selection.trim().to_lowercase())
            .or_default()
            .push(&leg.chosen_quote);

        let mut selections = Vec::with_capacity(sides.len());
        let mut implied = Vec::with_capacity(sides.len());
        for (selection, quotes) in &sides {
            let valid: Vec<&Quote> = quotes
                .iter()
                .copied()
                .filter(|q| validate_american(q.american_odds).is_ok())
                .collect();
            if let Some(p) = consensus_probability(&freshest_per_source(valid)) {
                selections.push(selection.as_str());
                implied.push(p);
            }
        }
        if implied.len() < 2 {
            return None;
        }

        let fair = devig(&implied);
        let target = leg.selection.trim().to_lowercase();
        debug!(
            leg_id = %leg.id,
            sides = implied.len(),
            overround = format!("{:.2}%", (implied.iter().sum::<f64>() - 1.0) * 100.0),
            "De-vigged market"
        );
        selections
            .iter()
            .position(|s| *s == target)
            .map(|i| fair[i])
    }

    /// EV of one leg at its optimised price.
    pub fn leg_ev(
        &self,
        leg: &Leg,
        optimized: &OptimizedLeg,
        snapshot: &QuoteSnapshot,
    ) -> Result<(LegEv, Option<EngineWarning>), ParlayError> {
        let decimal = to_decimal(optimized.best_odds)?;

        let (fair_probability, fair_source, warning) = match self.fair_probability(leg, snapshot) {
            Some(p) => (p, FairSource::Devigged, None),
            None => {
                let p = optimized.consensus_probability.unwrap_or(1.0 / decimal);
                let warning = EngineWarning::NoOpposingSide {
                    leg_id: leg.id.clone(),
                };
                (p, FairSource::Consensus, Some(warning))
            }
        };

        let ev = EvResult::new(fair_probability, decimal);
        Ok((
            LegEv {
                leg_id: leg.id.clone(),
                fair_source,
                fair_american_odds: probability_to_american(fair_probability).ok(),
                ev,
            },
            warning,
        ))
    }

    /// EV of the whole parlay, assuming independent legs.
    pub fn parlay_ev(&self, legs: &[LegEv], combined: &CombinedOdds) -> EvResult {
        let fair: f64 = legs.iter().map(|l| l.ev.fair_probability).product();
        EvResult::new(fair, combined.total_decimal_odds)
    }

    /// Joint win probability used for sizing.
    ///
    /// A leg uses its model estimate when one is supplied with sufficient
    /// confidence; otherwise its fair probability.
    pub fn true_probability(
        &self,
        legs: &[Leg],
        leg_ev: &[LegEv],
        estimates: &HashMap<String, ModelEstimate>,
    ) -> (f64, Vec<EngineWarning>) {
        let mut probability = 1.0;
        let mut warnings = Vec::new();

        for (leg, ev) in legs.iter().zip(leg_ev) {
            let p = match estimates.get(&leg.id) {
                Some(est) if !est.is_valid() => {
                    warnings.push(EngineWarning::InvalidEstimate {
                        leg_id: leg.id.clone(),
                        probability: est.probability,
                        confidence: est.confidence,
                    });
                    ev.ev.fair_probability
                }
                Some(est) if est.confidence >= self.config.min_estimate_confidence => {
                    est.probability
                }
                Some(est) => {
                    warnings.push(EngineWarning::LowConfidenceEstimate {
                        leg_id: leg.id.clone(),
                        confidence: est.confidence,
                    });
                    ev.ev.fair_probability
                }
                None => ev.ev.fair_probability,
            };
            probability *= p;
        }

        (probability, warnings)
    }
}
