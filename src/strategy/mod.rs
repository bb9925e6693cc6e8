//! Strategy engine: price optimisation, correlation, EV and bet sizing.

pub mod correlation;
pub mod edge;
pub mod kelly;
pub mod optimizer;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::pricing::parlay::{CombinedOdds, ParlayConfig};
use crate::types::{EngineWarning, ModelEstimate, Parlay, ParlayError, QuoteSnapshot};
use correlation::{CorrelationAnalyzer, CorrelationReport};
use edge::{expected_value_percent, EdgeDetector, EvResult, LegEv};
use kelly::{BetSizer, BetSizingRecommendation};
use optimizer::{MultiBookOptimizer, OptimizationResult};

// ---------------------------------------------------------------------------
// Request / result
// ---------------------------------------------------------------------------

/// Everything needed to analyse one parlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParlayRequest {
    pub parlay: Parlay,
    pub bankroll: Decimal,
    /// Optional model estimates keyed by leg id.
    #[serde(default)]
    pub estimates: HashMap<String, ModelEstimate>,
}

impl ParlayRequest {
    pub fn new(parlay: Parlay, bankroll: Decimal) -> Self {
        Self {
            parlay,
            bankroll,
            estimates: HashMap::new(),
        }
    }

    pub fn with_estimate(mut self, leg_id: impl Into<String>, estimate: ModelEstimate) -> Self {
        self.estimates.insert(leg_id.into(), estimate);
        self
    }
}

/// Full analysis of a parlay against one quote snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParlayAnalysis {
    /// Combined price at the legs' chosen quotes.
    pub combined: CombinedOdds,
    pub optimization: OptimizationResult,
    pub correlation: CorrelationReport,
    pub leg_ev: Vec<LegEv>,
    /// EV of the parlay at optimised prices.
    pub parlay_ev: EvResult,
    /// Joint win probability used for sizing.
    pub true_probability: f64,
    pub sizing: BetSizingRecommendation,
    /// Return on the requested stake at optimised prices.
    pub potential_payout: Decimal,
    pub warnings: Vec<EngineWarning>,
    pub analyzed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Pipelines leg-count validation → line shopping → correlation → EV →
/// bet sizing.
///
/// Stateless: the same request, snapshot and timestamp always produce the
/// same analysis.
pub struct ParlayAnalyzer {
    limits: ParlayConfig,
    correlation: CorrelationAnalyzer,
    optimizer: MultiBookOptimizer,
    edge: EdgeDetector,
    sizer: BetSizer,
}

impl ParlayAnalyzer {
    pub fn new(
        limits: ParlayConfig,
        correlation: CorrelationAnalyzer,
        optimizer: MultiBookOptimizer,
        edge: EdgeDetector,
        sizer: BetSizer,
    ) -> Self {
        Self {
            limits,
            correlation,
            optimizer,
            edge,
            sizer,
        }
    }

    pub fn limits(&self) -> &ParlayConfig {
        &self.limits
    }

    pub fn analyze(
        &self,
        request: &ParlayRequest,
        snapshot: &QuoteSnapshot,
        now: DateTime<Utc>,
    ) -> Result<ParlayAnalysis, ParlayError> {
        let legs = &request.parlay.legs;

        // Step 1: Reject unpricable leg counts
        self.limits.validate_leg_count(legs.len())?;

        // Step 2: Line shopping across sources
        let optimization = self.optimizer.optimize(legs, snapshot, now)?;
        let mut warnings = optimization.warnings.clone();

        // Step 3: Correlation
        let correlation = self.correlation.analyze(legs);

        // Step 4: Per-leg and parlay EV at the optimised prices
        let mut leg_ev = Vec::with_capacity(legs.len());
        for (leg, optimized) in legs.iter().zip(&optimization.per_leg) {
            let (ev, warning) = self.edge.leg_ev(leg, optimized, snapshot)?;
            warnings.extend(warning);
            leg_ev.push(ev);
        }
        let parlay_ev = self.edge.parlay_ev(&leg_ev, &optimization.optimized_odds);

        // Step 5: True probability (model estimates override fair prices)
        let (true_probability, estimate_warnings) =
            self.edge
                .true_probability(legs, &leg_ev, &request.estimates);
        warnings.extend(estimate_warnings);

        // Step 6: Sizing
        let decimal = optimization.optimized_odds.total_decimal_odds;
        let sizing_ev = expected_value_percent(true_probability, decimal);
        let mut sizing = self.sizer.recommend(
            decimal,
            true_probability,
            request.bankroll,
            sizing_ev,
            correlation.warnings.len(),
        )?;
        sizing.reasoning.push(format!(
            "Independence score {:.0} ({} correlation risk)",
            correlation.independence_score, correlation.risk
        ));

        for w in &warnings {
            debug!(leg_id = w.leg_id(), "{}", w);
        }
        if correlation.has_conflicts() {
            warn!(
                conflicts = correlation.conflict_count(),
                "Parlay contains mutually exclusive legs"
            );
        }

        let potential_payout = optimization.optimized_odds.payout(request.parlay.stake)?;

        info!(
            legs = legs.len(),
            odds = optimization.optimized_odds.total_american_odds,
            ev = format!("{:.2}%", parlay_ev.expected_value_percent),
            independence = format!("{:.0}", correlation.independence_score),
            recommended = %sizing.recommended_bet,
            warnings = warnings.len(),
            "Parlay analysed"
        );

        Ok(ParlayAnalysis {
            combined: optimization.original_odds,
            optimization,
            correlation,
            leg_ev,
            parlay_ev,
            true_probability,
            sizing,
            potential_payout,
            warnings,
            analyzed_at: now,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
