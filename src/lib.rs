//! Parlay pricing engine.
//!
//! Converts odds between formats, combines legs into parlay prices, shops
//! each leg across price sources, flags correlated legs, estimates expected
//! value and sizes stakes with fractional Kelly. The `engine` module keeps
//! an analysis current against a live quote feed.

pub mod config;
pub mod engine;
pub mod pricing;
pub mod strategy;
pub mod types;
