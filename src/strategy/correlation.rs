//! Correlation analysis across parlay legs.
//!
//! Parlay pricing assumes independent legs. Two legs on the same event
//! rarely are: opposite sides of one market cannot both win, and related
//! markets (a favourite's moneyline and spread, a player's props and the
//! game total) move together. This module flags those pairs and condenses
//! them into a 0–100 independence score.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::types::{Leg, MarketKind};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Scoring heuristics.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Points deducted per same-event conflict.
    pub conflict_penalty: f64,
    /// Points deducted per statistical correlation.
    pub soft_penalty: f64,
    /// Highest score a leg set containing any conflict may receive.
    pub conflict_ceiling: f64,
    /// Scores at or above this are low risk.
    pub low_risk_threshold: f64,
    /// Scores at or above this (and below low) are moderate risk.
    pub moderate_risk_threshold: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            conflict_penalty: 50.0,
            soft_penalty: 15.0,
            conflict_ceiling: 50.0,
            low_risk_threshold: 80.0,
            moderate_risk_threshold: 60.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationKind {
    /// Mutually exclusive selections on the same event.
    SameEventConflict,
    /// Outcomes that tend to move together.
    StatisticalCorrelation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationRisk {
    Low,
    Moderate,
    High,
}

impl fmt::Display for CorrelationRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationRisk::Low => write!(f, "low"),
            CorrelationRisk::Moderate => write!(f, "moderate"),
            CorrelationRisk::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationWarning {
    pub leg_ids: Vec<String>,
    pub kind: CorrelationKind,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationReport {
    /// 0–100; higher means more independent.
    pub independence_score: f64,
    pub risk: CorrelationRisk,
    pub warnings: Vec<CorrelationWarning>,
}

impl CorrelationReport {
    pub fn conflict_count(&self) -> usize {
        self.count(CorrelationKind::SameEventConflict)
    }

    pub fn correlation_count(&self) -> usize {
        self.count(CorrelationKind::StatisticalCorrelation)
    }

    pub fn has_conflicts(&self) -> bool {
        self.conflict_count() > 0
    }

    fn count(&self, kind: CorrelationKind) -> usize {
        self.warnings.iter().filter(|w| w.kind == kind).count()
    }
}

// ---------------------------------------------------------------------------
// Related-market rules
// ---------------------------------------------------------------------------

struct CorrelationRule {
    first: MarketKind,
    second: MarketKind,
    reason: &'static str,
}

/// Market pairs on one event that move together. Order within a pair is
/// irrelevant.
const CORRELATED_MARKETS: &[CorrelationRule] = &[
    CorrelationRule {
        first: MarketKind::Moneyline,
        second: MarketKind::Spread,
        reason: "winning outright and covering the spread are strongly linked",
    },
    CorrelationRule {
        first: MarketKind::Moneyline,
        second: MarketKind::Total,
        reason: "game script ties the winner to the scoring total",
    },
    CorrelationRule {
        first: MarketKind::Spread,
        second: MarketKind::Total,
        reason: "margin of victory and total points follow the same game flow",
    },
    CorrelationRule {
        first: MarketKind::Prop,
        second: MarketKind::Total,
        reason: "player output feeds directly into the game total",
    },
    CorrelationRule {
        first: MarketKind::Prop,
        second: MarketKind::Moneyline,
        reason: "individual performance is tied to the team result",
    },
    CorrelationRule {
        first: MarketKind::Prop,
        second: MarketKind::Spread,
        reason: "individual performance is tied to the margin of victory",
    },
];

fn related_markets(a: MarketKind, b: MarketKind) -> Option<&'static CorrelationRule> {
    CORRELATED_MARKETS
        .iter()
        .find(|r| (r.first == a && r.second == b) || (r.first == b && r.second == a))
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

pub struct CorrelationAnalyzer {
    config: CorrelationConfig,
}

impl CorrelationAnalyzer {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Examine every pair of legs and score the set's independence.
    ///
    /// Legs on different events are treated as independent.
    pub fn analyze(&self, legs: &[Leg]) -> CorrelationReport {
        let mut warnings = Vec::new();

        for (i, a) in legs.iter().enumerate() {
            for b in &legs[i + 1..] {
                if a.event_id != b.event_id {
                    continue;
                }
                if let Some(warning) = classify_pair(a, b) {
                    debug!(
                        first = %a.id,
                        second = %b.id,
                        kind = ?warning.kind,
                        "Correlated legs"
                    );
                    warnings.push(warning);
                }
            }
        }

        let conflicts = warnings
            .iter()
            .filter(|w| w.kind == CorrelationKind::SameEventConflict)
            .count();
        let soft = warnings.len() - conflicts;
        let independence_score = self.score(conflicts, soft);
        let risk = self.risk_for(independence_score);

        if !warnings.is_empty() {
            info!(
                legs = legs.len(),
                conflicts,
                correlations = soft,
                score = format!("{:.0}", independence_score),
                %risk,
                "Correlation analysis"
            );
        }

        CorrelationReport {
            independence_score,
            risk,
            warnings,
        }
    }

    /// Classify an independence score into a risk band.
    pub fn risk_for(&self, score: f64) -> CorrelationRisk {
        if score >= self.config.low_risk_threshold {
            CorrelationRisk::Low
        } else if score >= self.config.moderate_risk_threshold {
            CorrelationRisk::Moderate
        } else {
            CorrelationRisk::High
        }
    }

    fn score(&self, conflicts: usize, soft: usize) -> f64 {
        let mut score = 100.0
            - conflicts as f64 * self.config.conflict_penalty
            - soft as f64 * self.config.soft_penalty;
        if conflicts > 0 {
            score = score.min(self.config.conflict_ceiling);
        }
        score.clamp(0.0, 100.0)
    }
}

/// Decide how two legs on the same event relate, if at all.
fn classify_pair(a: &Leg, b: &Leg) -> Option<CorrelationWarning> {
    let leg_ids = vec![a.id.clone(), b.id.clone()];

    if a.key() == b.key() {
        return Some(CorrelationWarning {
            leg_ids,
            kind: CorrelationKind::StatisticalCorrelation,
            description: format!("Duplicate selection: {} {} appears twice", a.market, a.selection),
        });
    }

    let (kind_a, kind_b) = (a.market.kind(), b.market.kind());

    if a.opposes(b) {
        let description = match kind_a {
            MarketKind::Moneyline => format!(
                "Both sides of the moneyline on {}: {} and {}",
                a.event_id, a.selection, b.selection
            ),
            MarketKind::Spread => format!(
                "Opposite sides of the spread on {}: {} and {}",
                a.event_id, a.selection, b.selection
            ),
            MarketKind::Total => format!(
                "Over and under on the same total on {}: {} and {}",
                a.event_id, a.selection, b.selection
            ),
            MarketKind::Prop => format!(
                "Opposite sides of the same prop ({}): {} and {}",
                a.market, a.selection, b.selection
            ),
        };
        return Some(CorrelationWarning {
            leg_ids,
            kind: CorrelationKind::SameEventConflict,
            description,
        });
    }

    if kind_a == kind_b {
        return match kind_a {
            MarketKind::Prop => {
                let (pa, pb) = (a.market.player()?, b.market.player()?);
                pa.eq_ignore_ascii_case(pb).then(|| CorrelationWarning {
                    leg_ids,
                    kind: CorrelationKind::StatisticalCorrelation,
                    description: format!("Multiple props on {pa}: stat lines move together"),
                })
            }
            _ if a.same_selection(&b.selection) => Some(CorrelationWarning {
                leg_ids,
                kind: CorrelationKind::StatisticalCorrelation,
                description: format!(
                    "Alternate {} lines on {}: {} and {}",
                    kind_a, a.event_id, a.market, b.market
                ),
            }),
            _ => Some(CorrelationWarning {
                leg_ids,
                kind: CorrelationKind::StatisticalCorrelation,
                description: format!(
                    "Overlapping {} lines on {}: {} {} and {} {} can both win",
                    kind_a, a.event_id, a.selection, a.market, b.selection, b.market
                ),
            }),
        };
    }

    related_markets(kind_a, kind_b).map(|rule| CorrelationWarning {
        leg_ids,
        kind: CorrelationKind::StatisticalCorrelation,
        description: format!(
            "{} and {} on {}: {}",
            kind_a, kind_b, a.event_id, rule.reason
        ),
    })
}
