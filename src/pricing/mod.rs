//! Odds-space arithmetic: conversions between formats and parlay combination.

pub mod odds;
pub mod parlay;

pub use odds::{probability_to_american, to_american, to_decimal, to_implied_probability};
pub use parlay::{combine, combine_odds, CombinedOdds, ParlayConfig};
