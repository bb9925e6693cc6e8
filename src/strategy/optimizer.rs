//! Multi-book price optimisation.
//!
//! For each leg, pick the best price on offer across every source in the
//! snapshot, rank the alternatives, and measure each price against the
//! market consensus (median implied probability across sources).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::pricing::odds::{to_implied_probability, validate_american};
use crate::pricing::parlay::{combine, combine_odds, CombinedOdds};
use crate::types::{EngineWarning, Leg, ParlayError, Quote, QuoteSnapshot};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Best prices older than this are flagged as stale.
    pub staleness_secs: i64,
    /// Alternatives kept per leg (best first).
    pub max_alternatives: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            staleness_secs: 60,
            max_alternatives: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// A competing price for a leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAlternative {
    pub source_id: String,
    pub american_odds: i32,
    /// Relative edge versus consensus, in percent. Positive is better than market.
    pub edge_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizedLeg {
    pub leg_id: String,
    pub original_source_id: String,
    pub original_odds: i32,
    pub best_source_id: String,
    pub best_odds: i32,
    pub best_observed_at: DateTime<Utc>,
    /// Median implied probability across sources, when any were quoted.
    pub consensus_probability: Option<f64>,
    pub edge_percent: f64,
    /// Next-best prices from other sources, best first.
    pub alternatives: Vec<PriceAlternative>,
    pub source_count: usize,
}

impl OptimizedLeg {
    /// Whether a better price than the chosen one was found.
    pub fn improved(&self) -> bool {
        compare_american(self.best_odds, self.original_odds) == Ordering::Greater
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub original_odds: CombinedOdds,
    pub optimized_odds: CombinedOdds,
    pub per_leg: Vec<OptimizedLeg>,
    /// Gain in total decimal odds from switching to best prices, in percent.
    pub improvement_percent: f64,
    pub recommendations: Vec<String>,
    pub warnings: Vec<EngineWarning>,
}

impl OptimizationResult {
    pub fn leg(&self, leg_id: &str) -> Option<&OptimizedLeg> {
        self.per_leg.iter().find(|l| l.leg_id == leg_id)
    }
}

// ---------------------------------------------------------------------------
// Price helpers
// ---------------------------------------------------------------------------

/// Order two American prices by value to the bettor (`Greater` = `a` pays more).
///
/// Any positive price beats any negative one; among positives the larger
/// wins; among negatives the one closer to zero wins.
pub fn compare_american(a: i32, b: i32) -> Ordering {
    match (a > 0, b > 0) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        // Same sign: plain integer order already ranks -105 above -110.
        _ => a.cmp(&b),
    }
}

/// Best price first; ties go to the freshest quote, then to source id.
fn rank_quotes(quotes: &mut [&Quote]) {
    quotes.sort_by(|a, b| {
        compare_american(b.american_odds, a.american_odds)
            .then_with(|| b.observed_at.cmp(&a.observed_at))
            .then_with(|| a.source_id.cmp(&b.source_id))
    });
}

/// Keep only each source's most recent quote.
pub fn freshest_per_source<'a, I>(quotes: I) -> Vec<&'a Quote>
where
    I: IntoIterator<Item = &'a Quote>,
{
    let mut latest: BTreeMap<&str, &Quote> = BTreeMap::new();
    for quote in quotes {
        latest
            .entry(quote.source_id.as_str())
            .and_modify(|current| {
                let newer = quote.observed_at > current.observed_at;
                let same_time_better = quote.observed_at == current.observed_at
                    && compare_american(quote.american_odds, current.american_odds)
                        == Ordering::Greater;
                if newer || same_time_better {
                    *current = quote;
                }
            })
            .or_insert(quote);
    }
    latest.into_values().collect()
}

/// Median implied probability across the given quotes.
///
/// With an even count the two middle probabilities are averaged. Returns
/// `None` when no valid quote is present.
pub fn consensus_probability(quotes: &[&Quote]) -> Option<f64> {
    let mut probs: Vec<f64> = quotes
        .iter()
        .filter_map(|q| to_implied_probability(q.american_odds).ok())
        .collect();
    if probs.is_empty() {
        return None;
    }
    probs.sort_by(|a, b| a.total_cmp(b));
    let mid = probs.len() / 2;
    if probs.len() % 2 == 1 {
        Some(probs[mid])
    } else {
        Some((probs[mid - 1] + probs[mid]) / 2.0)
    }
}

/// Relative edge of a price against consensus, in percent.
pub fn edge_percent(consensus_probability: f64, quote_probability: f64) -> f64 {
    if consensus_probability <= 0.0 {
        return 0.0;
    }
    (consensus_probability - quote_probability) / consensus_probability * 100.0
}

// ---------------------------------------------------------------------------
// Optimizer
// ---------------------------------------------------------------------------

pub struct MultiBookOptimizer {
    config: OptimizerConfig,
}

impl MultiBookOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Re-price every leg at the best quote available in `snapshot`.
    ///
    /// Missing, invalid, stale and single-source data produce warnings, not
    /// errors. The only error is a leg whose own chosen quote is malformed.
    pub fn optimize(
        &self,
        legs: &[Leg],
        snapshot: &QuoteSnapshot,
        now: DateTime<Utc>,
    ) -> Result<OptimizationResult, ParlayError> {
        let original_odds = combine(legs)?;
        let mut per_leg = Vec::with_capacity(legs.len());
        let mut warnings = Vec::new();

        for leg in legs {
            per_leg.push(self.optimize_leg(leg, snapshot, now, &mut warnings)?);
        }

        let best: Vec<i32> = per_leg.iter().map(|l| l.best_odds).collect();
        let optimized_odds = combine_odds(&best)?;

        let improvement_percent = if original_odds.total_decimal_odds > 0.0 {
            (optimized_odds.total_decimal_odds - original_odds.total_decimal_odds)
                / original_odds.total_decimal_odds
                * 100.0
        } else {
            0.0
        };

        let recommendations = build_recommendations(&per_leg, &original_odds, &optimized_odds, improvement_percent);

        info!(
            legs = legs.len(),
            original = original_odds.total_american_odds,
            optimized = optimized_odds.total_american_odds,
            improvement = format!("{:.2}%", improvement_percent),
            warnings = warnings.len(),
            "Parlay optimised across sources"
        );

        Ok(OptimizationResult {
            original_odds,
            optimized_odds,
            per_leg,
            improvement_percent,
            recommendations,
            warnings,
        })
    }

    fn optimize_leg(
        &self,
        leg: &Leg,
        snapshot: &QuoteSnapshot,
        now: DateTime<Utc>,
        warnings: &mut Vec<EngineWarning>,
    ) -> Result<OptimizedLeg, ParlayError> {
        validate_american(leg.american_odds())?;

        let quoted = snapshot.quotes_for(leg);
        let mut valid: Vec<&Quote> = Vec::with_capacity(quoted.len() + 1);
        for quote in quoted.iter().filter(|q| leg.matches(q)) {
            if validate_american(quote.american_odds).is_ok() {
                valid.push(quote);
            } else {
                warn!(
                    leg_id = %leg.id,
                    source = %quote.source_id,
                    odds = quote.american_odds,
                    "Skipping invalid quote"
                );
                warnings.push(EngineWarning::InvalidQuote {
                    leg_id: leg.id.clone(),
                    source_id: quote.source_id.clone(),
                    american_odds: quote.american_odds,
                });
            }
        }

        if valid.is_empty() {
            debug!(leg_id = %leg.id, "No quotes for leg, keeping chosen price");
            warnings.push(EngineWarning::NoQuotesAvailable {
                leg_id: leg.id.clone(),
            });
        }

        // The leg's own price competes too, unless its source re-quoted.
        valid.push(&leg.chosen_quote);
        let mut candidates = freshest_per_source(valid);
        rank_quotes(&mut candidates);

        let consensus = consensus_probability(&candidates);
        let edge_of = |odds: i32| -> f64 {
            match (consensus, to_implied_probability(odds)) {
                (Some(c), Ok(p)) => edge_percent(c, p),
                _ => 0.0,
            }
        };

        // `candidates` always holds at least the chosen quote.
        let best = candidates[0];
        let alternatives = candidates
            .iter()
            .skip(1)
            .take(self.config.max_alternatives)
            .map(|q| PriceAlternative {
                source_id: q.source_id.clone(),
                american_odds: q.american_odds,
                edge_percent: edge_of(q.american_odds),
            })
            .collect();

        if candidates.len() == 1 {
            warnings.push(EngineWarning::SingleSource {
                leg_id: leg.id.clone(),
                source_id: best.source_id.clone(),
            });
        }

        let max_age = chrono::Duration::seconds(self.config.staleness_secs);
        if best.is_stale(now, max_age) {
            let age_secs = best.age(now).num_seconds();
            warn!(leg_id = %leg.id, source = %best.source_id, age_secs, "Best price is stale");
            warnings.push(EngineWarning::StaleData {
                leg_id: leg.id.clone(),
                source_id: best.source_id.clone(),
                age_secs,
            });
        }

        Ok(OptimizedLeg {
            leg_id: leg.id.clone(),
            original_source_id: leg.chosen_quote.source_id.clone(),
            original_odds: leg.american_odds(),
            best_source_id: best.source_id.clone(),
            best_odds: best.american_odds,
            best_observed_at: best.observed_at,
            consensus_probability: consensus,
            edge_percent: edge_of(best.american_odds),
            alternatives,
            source_count: candidates.len(),
        })
    }
}

fn build_recommendations(
    per_leg: &[OptimizedLeg],
    original: &CombinedOdds,
    optimized: &CombinedOdds,
    improvement_percent: f64,
) -> Vec<String> {
    let mut recs = Vec::new();
    if improvement_percent <= 0.0 {
        return recs;
    }

    recs.push(format!(
        "Shopping lines improves the parlay from {:+} to {:+} ({:.2}% higher payout)",
        original.total_american_odds, optimized.total_american_odds, improvement_percent
    ));
    for leg in per_leg.iter().filter(|l| l.improved()) {
        recs.push(format!(
            "Leg {}: take {:+} at {} instead of {:+} at {}",
            leg.leg_id, leg.best_odds, leg.best_source_id, leg.original_odds, leg.original_source_id
        ));
    }
    recs
}
