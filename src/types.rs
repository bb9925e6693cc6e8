//! Shared types for the parlay engine.
//!
//! These types form the data boundary used across all modules: quotes as
//! observed from price sources, normalised legs, the parlay itself, and the
//! error/warning taxonomy. Odds are American-format integers at this
//! boundary; decimal and probability forms are always derived.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// The kind of market a selection belongs to, without market-specific data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    Moneyline,
    Spread,
    Total,
    Prop,
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketKind::Moneyline => write!(f, "moneyline"),
            MarketKind::Spread => write!(f, "spread"),
            MarketKind::Total => write!(f, "total"),
            MarketKind::Prop => write!(f, "prop"),
        }
    }
}

/// Parse the loosely-named market strings sent by UI and feed layers.
impl FromStr for MarketKind {
    type Err = ParlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "moneyline" | "ml" | "h2h" => Ok(MarketKind::Moneyline),
            "spread" | "spreads" | "point_spread" => Ok(MarketKind::Spread),
            "total" | "totals" | "over_under" => Ok(MarketKind::Total),
            "prop" | "player_prop" => Ok(MarketKind::Prop),
            other => Err(ParlayError::InvalidLeg(format!("unknown market '{other}'"))),
        }
    }
}

/// A market with its market-specific required fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Market {
    Moneyline,
    /// Signed handicap for the selected side (e.g. -3.5 for the favourite).
    Spread { line: f64 },
    Total { line: f64 },
    Prop {
        player: String,
        stat: String,
        #[serde(default)]
        line: Option<f64>,
    },
}

impl Market {
    /// Build a market from loose parts, rejecting shapes that miss required fields.
    pub fn from_parts(
        kind: MarketKind,
        line: Option<f64>,
        player: Option<&str>,
        stat: Option<&str>,
    ) -> Result<Self, ParlayError> {
        if let Some(l) = line {
            if !l.is_finite() {
                return Err(ParlayError::InvalidLeg(format!("non-finite line {l}")));
            }
        }
        match kind {
            MarketKind::Moneyline => Ok(Market::Moneyline),
            MarketKind::Spread => line
                .map(|line| Market::Spread { line })
                .ok_or_else(|| ParlayError::InvalidLeg("spread market requires a line".into())),
            MarketKind::Total => line
                .map(|line| Market::Total { line })
                .ok_or_else(|| ParlayError::InvalidLeg("total market requires a line".into())),
            MarketKind::Prop => {
                let player = player
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| ParlayError::InvalidLeg("prop market requires a player".into()))?;
                let stat = stat
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| ParlayError::InvalidLeg("prop market requires a stat".into()))?;
                Ok(Market::Prop {
                    player: player.to_string(),
                    stat: stat.to_string(),
                    line,
                })
            }
        }
    }

    pub fn kind(&self) -> MarketKind {
        match self {
            Market::Moneyline => MarketKind::Moneyline,
            Market::Spread { .. } => MarketKind::Spread,
            Market::Total { .. } => MarketKind::Total,
            Market::Prop { .. } => MarketKind::Prop,
        }
    }

    pub fn line(&self) -> Option<f64> {
        match self {
            Market::Moneyline => None,
            Market::Spread { line } | Market::Total { line } => Some(*line),
            Market::Prop { line, .. } => *line,
        }
    }

    /// The player a prop market is about, if any.
    pub fn player(&self) -> Option<&str> {
        match self {
            Market::Prop { player, .. } => Some(player.as_str()),
            _ => None,
        }
    }

    /// Exact market identity, including the signed line.
    pub fn key(&self) -> String {
        match self {
            Market::Moneyline => "moneyline".to_string(),
            Market::Spread { line } => format!("spread:{}", unsigned_zero(*line)),
            Market::Total { line } => format!("total:{}", unsigned_zero(*line)),
            Market::Prop { player, stat, line } => match line {
                Some(l) => format!(
                    "prop:{}:{}:{}",
                    player.to_lowercase(),
                    stat.to_lowercase(),
                    unsigned_zero(*l)
                ),
                None => format!("prop:{}:{}", player.to_lowercase(), stat.to_lowercase()),
            },
        }
    }

    /// The market the other selections are priced on. A spread side at
    /// `line` is opposed by the other team at `-line`; every other market
    /// shares one line across its sides.
    pub fn opposing(&self) -> Market {
        match self {
            Market::Spread { line } => Market::Spread {
                line: unsigned_zero(-line),
            },
            other => other.clone(),
        }
    }
}

/// `-0.0` and `0.0` are the same line.
fn unsigned_zero(line: f64) -> f64 {
    if line == 0.0 {
        0.0
    } else {
        line
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::Moneyline => write!(f, "moneyline"),
            Market::Spread { line } => write!(f, "spread {line}"),
            Market::Total { line } => write!(f, "total {line}"),
            Market::Prop { player, stat, line: Some(l) } => write!(f, "{player} {stat} {l}"),
            Market::Prop { player, stat, line: None } => write!(f, "{player} {stat}"),
        }
    }
}

/// Canonical identity of a bet: event, exact market, and selection.
pub fn leg_key(event_id: &str, market: &Market, selection: &str) -> String {
    format!("{event_id}|{}|{}", market.key(), selection.trim().to_lowercase())
}

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

/// A single price observed from one source at one instant. Immutable once
/// recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub source_id: String,
    pub event_id: String,
    pub market: Market,
    pub selection: String,
    pub american_odds: i32,
    pub observed_at: DateTime<Utc>,
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {} @ {} ({})",
            self.source_id,
            self.event_id,
            self.market,
            self.selection,
            self.american_odds,
            self.observed_at.format("%H:%M:%S"),
        )
    }
}

impl Quote {
    pub fn leg_key(&self) -> String {
        leg_key(&self.event_id, &self.market, &self.selection)
    }

    /// How old this quote is at `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.observed_at
    }

    /// Whether the quote is older than `max_age` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        self.age(now) > max_age
    }
}

// ---------------------------------------------------------------------------
// Leg
// ---------------------------------------------------------------------------

/// One normalised selection within a parlay. Owns the quote it was priced at;
/// competing quotes live in a [`QuoteSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub id: String,
    pub event_id: String,
    pub sport: String,
    pub market: Market,
    pub selection: String,
    pub chosen_quote: Quote,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} {} {} @ {} ({})",
            self.id,
            self.sport,
            self.event_id,
            self.market,
            self.selection,
            self.chosen_quote.american_odds,
            self.chosen_quote.source_id,
        )
    }
}

impl Leg {
    /// Build a leg, checking that the chosen quote prices this exact bet.
    pub fn new(
        id: impl Into<String>,
        sport: impl Into<String>,
        chosen_quote: Quote,
    ) -> Result<Self, ParlayError> {
        let id = id.into();
        if chosen_quote.event_id.trim().is_empty() {
            return Err(ParlayError::InvalidLeg(format!("leg {id} has an empty event id")));
        }
        if chosen_quote.selection.trim().is_empty() {
            return Err(ParlayError::InvalidLeg(format!("leg {id} has an empty selection")));
        }
        crate::pricing::odds::validate_american(chosen_quote.american_odds)?;

        Ok(Self {
            id,
            event_id: chosen_quote.event_id.clone(),
            sport: sport.into(),
            market: chosen_quote.market.clone(),
            selection: chosen_quote.selection.clone(),
            chosen_quote,
        })
    }

    pub fn key(&self) -> String {
        leg_key(&self.event_id, &self.market, &self.selection)
    }

    pub fn american_odds(&self) -> i32 {
        self.chosen_quote.american_odds
    }

    /// Whether `quote` prices the same bet as this leg.
    pub fn matches(&self, quote: &Quote) -> bool {
        quote.leg_key() == self.key()
    }

    pub fn same_selection(&self, other: &str) -> bool {
        self.selection.trim().eq_ignore_ascii_case(other.trim())
    }

    /// Whether `other` is another selection of the same market, so at most
    /// one of the two can win.
    pub fn opposes(&self, other: &Leg) -> bool {
        self.event_id == other.event_id
            && !self.same_selection(&other.selection)
            && other.market.key() == self.market.opposing().key()
    }
}

/// Loosely-typed leg as produced by UI and feed layers. Normalised into a
/// [`Leg`] via `TryFrom`, which rejects malformed shapes early.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLeg {
    #[serde(default)]
    pub id: Option<String>,
    pub event_id: String,
    #[serde(default)]
    pub sport: String,
    pub market: String,
    pub selection: String,
    #[serde(default)]
    pub line: Option<f64>,
    #[serde(default)]
    pub player: Option<String>,
    #[serde(default)]
    pub stat: Option<String>,
    pub source_id: String,
    pub american_odds: i32,
    pub observed_at: DateTime<Utc>,
}

impl TryFrom<RawLeg> for Leg {
    type Error = ParlayError;

    fn try_from(raw: RawLeg) -> Result<Self, Self::Error> {
        let kind: MarketKind = raw.market.parse()?;
        let market = Market::from_parts(kind, raw.line, raw.player.as_deref(), raw.stat.as_deref())?;
        if raw.source_id.trim().is_empty() {
            return Err(ParlayError::InvalidLeg("quote has an empty source id".into()));
        }
        let id = raw
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let quote = Quote {
            source_id: raw.source_id,
            event_id: raw.event_id.trim().to_string(),
            market,
            selection: raw.selection.trim().to_string(),
            american_odds: raw.american_odds,
            observed_at: raw.observed_at,
        };
        Leg::new(id, raw.sport, quote)
    }
}

// ---------------------------------------------------------------------------
// Parlay
// ---------------------------------------------------------------------------

/// A multi-leg wager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parlay {
    pub legs: Vec<Leg>,
    pub stake: Decimal,
}

impl Parlay {
    pub fn new(legs: Vec<Leg>, stake: Decimal) -> Self {
        Self { legs, stake }
    }

    /// Normalise raw legs, failing on the first malformed one.
    pub fn from_raw(raw_legs: Vec<RawLeg>, stake: Decimal) -> Result<Self, ParlayError> {
        let legs = raw_legs
            .into_iter()
            .map(Leg::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { legs, stake })
    }

    pub fn leg_count(&self) -> usize {
        self.legs.len()
    }
}

/// Externally produced probability estimate for a leg (e.g. from a
/// prediction model). The engine treats it as a given input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelEstimate {
    pub probability: f64,
    /// Model self-reported confidence (0–1).
    pub confidence: f64,
}

impl ModelEstimate {
    /// Whether probability and confidence are within [0, 1] and finite.
    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.probability) && (0.0..=1.0).contains(&self.confidence)
    }
}

// ---------------------------------------------------------------------------
// Quote snapshot
// ---------------------------------------------------------------------------

/// Explicitly passed quote cache for one pipeline invocation, keyed by leg
/// identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    by_leg: HashMap<String, Vec<Quote>>,
}

impl QuoteSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group quotes (from any number of sources) by leg identity.
    pub fn from_quotes<I>(quotes: I) -> Self
    where
        I: IntoIterator<Item = Quote>,
    {
        let mut snapshot = Self::new();
        for quote in quotes {
            snapshot.insert(quote);
        }
        snapshot
    }

    pub fn insert(&mut self, quote: Quote) {
        self.by_leg.entry(quote.leg_key()).or_default().push(quote);
    }

    /// Every quote for exactly this leg's bet, from all sources.
    pub fn quotes_for(&self, leg: &Leg) -> &[Quote] {
        self.by_leg.get(&leg.key()).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Quotes for every side of `leg`'s market, grouped by lower-cased
    /// selection. The leg's own side holds only its exact bet; other sides
    /// hold the other selections priced on the opposing line.
    pub fn market_sides(&self, leg: &Leg) -> BTreeMap<String, Vec<&Quote>> {
        let own_key = leg.market.key();
        let opposing_key = leg.market.opposing().key();
        let own_selection = leg.selection.trim().to_lowercase();

        let mut sides: BTreeMap<String, Vec<&Quote>> = BTreeMap::new();
        for quote in self.by_leg.values().flatten() {
            if quote.event_id != leg.event_id {
                continue;
            }
            let selection = quote.selection.trim().to_lowercase();
            let market_key = quote.market.key();
            let on_side = if selection == own_selection {
                market_key == own_key
            } else {
                market_key == opposing_key
            };
            if on_side {
                sides.entry(selection).or_default().push(quote);
            }
        }
        // HashMap iteration order is arbitrary; keep per-side order stable.
        for quotes in sides.values_mut() {
            quotes.sort_by(|a, b| {
                a.source_id
                    .cmp(&b.source_id)
                    .then_with(|| a.observed_at.cmp(&b.observed_at))
            });
        }
        sides
    }

    /// Every quote held, grouped by leg in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Quote> {
        self.by_leg.values().flatten()
    }

    /// Distinct source ids present in the snapshot.
    pub fn sources(&self) -> BTreeSet<&str> {
        self.by_leg
            .values()
            .flatten()
            .map(|q| q.source_id.as_str())
            .collect()
    }

    /// Total number of quotes held.
    pub fn len(&self) -> usize {
        self.by_leg.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Non-fatal data conditions attached to results instead of being thrown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineWarning {
    /// No source quoted the leg; its existing chosen quote was used.
    NoQuotesAvailable { leg_id: String },
    /// Only one source prices the leg.
    SingleSource { leg_id: String, source_id: String },
    /// The best available price is older than the staleness threshold.
    StaleData {
        leg_id: String,
        source_id: String,
        age_secs: i64,
    },
    /// A quote with malformed odds was skipped.
    InvalidQuote {
        leg_id: String,
        source_id: String,
        american_odds: i32,
    },
    /// No other side of the market is quoted, so the price could not be de-vigged.
    NoOpposingSide { leg_id: String },
    /// A model estimate was ignored for lack of confidence.
    LowConfidenceEstimate { leg_id: String, confidence: f64 },
    /// A model estimate was ignored because its probability or confidence
    /// is not a number in [0, 1].
    InvalidEstimate {
        leg_id: String,
        probability: f64,
        confidence: f64,
    },
}

impl EngineWarning {
    pub fn leg_id(&self) -> &str {
        match self {
            EngineWarning::NoQuotesAvailable { leg_id }
            | EngineWarning::SingleSource { leg_id, .. }
            | EngineWarning::StaleData { leg_id, .. }
            | EngineWarning::InvalidQuote { leg_id, .. }
            | EngineWarning::NoOpposingSide { leg_id }
            | EngineWarning::LowConfidenceEstimate { leg_id, .. }
            | EngineWarning::InvalidEstimate { leg_id, .. } => leg_id,
        }
    }
}

impl fmt::Display for EngineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineWarning::NoQuotesAvailable { leg_id } => {
                write!(f, "Leg {leg_id}: no quotes available, using the existing price")
            }
            EngineWarning::SingleSource { leg_id, source_id } => {
                write!(f, "Leg {leg_id}: only {source_id} prices this selection (single-source risk)")
            }
            EngineWarning::StaleData { leg_id, source_id, age_secs } => {
                write!(f, "Leg {leg_id}: best price from {source_id} is stale ({age_secs}s old)")
            }
            EngineWarning::InvalidQuote { leg_id, source_id, american_odds } => {
                write!(f, "Leg {leg_id}: skipped invalid odds {american_odds} from {source_id}")
            }
            EngineWarning::NoOpposingSide { leg_id } => {
                write!(f, "Leg {leg_id}: opposing side not quoted, fair probability includes margin")
            }
            EngineWarning::LowConfidenceEstimate { leg_id, confidence } => write!(
                f,
                "Leg {leg_id}: model estimate ignored (confidence {:.0}%)",
                confidence * 100.0
            ),
            EngineWarning::InvalidEstimate { leg_id, probability, confidence } => write!(
                f,
                "Leg {leg_id}: model estimate ignored (probability {probability}, confidence {confidence} out of range)"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures that make a parlay impossible to price. Partial-data conditions
/// are [`EngineWarning`]s instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParlayError {
    #[error("Invalid American odds: {0} (must be <= -100 or >= 100)")]
    InvalidOdds(i32),

    #[error("Invalid decimal odds: {0} (must be finite and > 1.0)")]
    InvalidDecimalOdds(f64),

    #[error("Insufficient legs: need at least {min}, got {actual}")]
    InsufficientLegs { min: usize, actual: usize },

    #[error("Too many legs: at most {max} allowed, got {actual}")]
    TooManyLegs { max: usize, actual: usize },

    #[error("Invalid leg: {0}")]
    InvalidLeg(String),

    #[error("Invalid probability: {0} (must be within [0, 1])")]
    InvalidProbability(f64),

    #[error("Odds overflow: decimal odds {0} are too long to price")]
    OddsOverflow(f64),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
