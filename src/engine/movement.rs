//! Line movement tracking.
//!
//! Keeps a bounded time series of prices per (leg, source) and reports
//! whether the price has moved in the bettor's favour over the retained
//! window.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::trace;

use crate::pricing::odds::to_implied_probability;
use crate::types::{ParlayError, Quote};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Points older than this (relative to the newest point) are evicted.
    pub retention_hours: i64,
    /// Maximum points kept per series.
    pub max_points: usize,
    /// Relative implied-probability change (percent) below which a line is stable.
    pub min_change_percent: f64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            retention_hours: 24,
            max_points: 500,
            min_change_percent: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OddsPoint {
    pub american_odds: i32,
    pub implied_probability: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementDirection {
    /// Price got longer (implied probability fell).
    Improving,
    /// Price got shorter.
    Worsening,
    Stable,
}

impl fmt::Display for MovementDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MovementDirection::Improving => write!(f, "improving"),
            MovementDirection::Worsening => write!(f, "worsening"),
            MovementDirection::Stable => write!(f, "stable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineMovementRecord {
    pub leg_key: String,
    pub source_id: String,
    pub series: Vec<OddsPoint>,
    pub direction: MovementDirection,
    /// Relative change in implied probability from oldest to newest, in percent.
    pub change_percent: f64,
}

/// Classify movement between two implied probabilities.
///
/// Moves smaller than `threshold_percent` are stable. See
/// [`classify_series`] for whole windows.
pub fn classify(oldest: f64, newest: f64, threshold_percent: f64) -> (MovementDirection, f64) {
    if oldest <= 0.0 {
        return (MovementDirection::Stable, 0.0);
    }
    let change_percent = (newest - oldest) / oldest * 100.0;
    let direction = if change_percent <= -threshold_percent {
        MovementDirection::Improving
    } else if change_percent >= threshold_percent {
        MovementDirection::Worsening
    } else {
        MovementDirection::Stable
    };
    (direction, change_percent)
}

/// Classify a retained window, oldest point first.
///
/// A window that moves the same way at every step is a trend regardless of
/// size; anything else is judged end to end against `threshold_percent`.
pub fn classify_series<'a, I>(points: I, threshold_percent: f64) -> (MovementDirection, f64)
where
    I: IntoIterator<Item = &'a OddsPoint>,
{
    let probabilities: Vec<f64> = points.into_iter().map(|p| p.implied_probability).collect();
    let (Some(&oldest), Some(&newest)) = (probabilities.first(), probabilities.last()) else {
        return (MovementDirection::Stable, 0.0);
    };
    let (direction, change_percent) = classify(oldest, newest, threshold_percent);
    if probabilities.len() < 2 || oldest <= 0.0 {
        return (direction, change_percent);
    }

    if probabilities.windows(2).all(|w| w[1] < w[0]) {
        (MovementDirection::Improving, change_percent)
    } else if probabilities.windows(2).all(|w| w[1] > w[0]) {
        (MovementDirection::Worsening, change_percent)
    } else {
        (direction, change_percent)
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

type SeriesKey = (String, String);

/// Per-(leg, source) price history.
pub struct LineMovementTracker {
    config: MovementConfig,
    series: HashMap<SeriesKey, VecDeque<OddsPoint>>,
}

impl LineMovementTracker {
    pub fn new(config: MovementConfig) -> Self {
        Self {
            config,
            series: HashMap::new(),
        }
    }

    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    /// Append a quote to its series.
    ///
    /// Returns `Ok(false)` when the quote is older than the newest point
    /// already held (out-of-order delivery). A quote at the same instant as
    /// the newest point replaces it.
    pub fn record(&mut self, quote: &Quote) -> Result<bool, ParlayError> {
        let point = OddsPoint {
            american_odds: quote.american_odds,
            implied_probability: to_implied_probability(quote.american_odds)?,
            timestamp: quote.observed_at,
        };

        let points = self
            .series
            .entry((quote.leg_key(), quote.source_id.clone()))
            .or_default();

        match points.back().map(|p| p.timestamp) {
            Some(newest) if point.timestamp < newest => {
                trace!(source = %quote.source_id, "Ignoring out-of-order quote");
                return Ok(false);
            }
            Some(newest) if point.timestamp == newest => {
                points.pop_back();
                points.push_back(point);
            }
            _ => points.push_back(point),
        }

        // Evict by age relative to the newest point, then by count
        let cutoff = point.timestamp - Duration::hours(self.config.retention_hours);
        while points.front().is_some_and(|p| p.timestamp < cutoff) {
            points.pop_front();
        }
        while points.len() > self.config.max_points {
            points.pop_front();
        }

        Ok(true)
    }

    /// Movement summary for one (leg, source) pair.
    pub fn movement(&self, leg_key: &str, source_id: &str) -> Option<LineMovementRecord> {
        let key = (leg_key.to_string(), source_id.to_string());
        let points = self.series.get(&key)?;
        self.summarise(&key, points)
    }

    /// Movement for every source tracking `leg_key`, sorted by source.
    pub fn movements_for(&self, leg_key: &str) -> Vec<LineMovementRecord> {
        let mut records: Vec<LineMovementRecord> = self
            .series
            .iter()
            .filter(|((leg, _), _)| leg == leg_key)
            .filter_map(|(key, points)| self.summarise(key, points))
            .collect();
        records.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        records
    }

    /// Drop points older than the retention window at `now`. Returns the
    /// number of points removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::hours(self.config.retention_hours);
        let mut removed = 0;
        for points in self.series.values_mut() {
            while points.front().is_some_and(|p| p.timestamp < cutoff) {
                points.pop_front();
                removed += 1;
            }
        }
        self.series.retain(|_, points| !points.is_empty());
        removed
    }

    /// Number of tracked (leg, source) series.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    fn summarise(&self, key: &SeriesKey, points: &VecDeque<OddsPoint>) -> Option<LineMovementRecord> {
        if points.is_empty() {
            return None;
        }
        let (direction, change_percent) = classify_series(points, self.config.min_change_percent);
        Some(LineMovementRecord {
            leg_key: key.0.clone(),
            source_id: key.1.clone(),
            series: points.iter().copied().collect(),
            direction,
            change_percent,
        })
    }
}
