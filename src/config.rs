//! Configuration loading from TOML.
//!
//! Every heuristic the engine applies (leg limits, correlation penalties,
//! staleness, Kelly multiplier and caps, movement windows, refresh timing)
//! lives here. Each section is optional; missing values fall back to the
//! defaults on the individual module configs.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::engine::movement::MovementConfig;
use crate::engine::refresh::RefreshConfig;
use crate::pricing::parlay::ParlayConfig;
use crate::strategy::correlation::{CorrelationAnalyzer, CorrelationConfig};
use crate::strategy::edge::{EdgeConfig, EdgeDetector};
use crate::strategy::kelly::{BetSizer, KellyConfig};
use crate::strategy::optimizer::{MultiBookOptimizer, OptimizerConfig};
use crate::strategy::ParlayAnalyzer;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub parlay: ParlayConfig,
    pub correlation: CorrelationConfig,
    pub optimizer: OptimizerConfig,
    pub edge: EdgeConfig,
    pub sizing: KellyConfig,
    pub movement: MovementConfig,
    pub refresh: RefreshConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(contents).context("Invalid TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make pricing or sizing meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.parlay.min_legs == 0 || self.parlay.min_legs > self.parlay.max_legs {
            bail!(
                "parlay.min_legs ({}) must be at least 1 and not exceed max_legs ({})",
                self.parlay.min_legs,
                self.parlay.max_legs
            );
        }
        if self.correlation.moderate_risk_threshold > self.correlation.low_risk_threshold {
            bail!("correlation.moderate_risk_threshold must not exceed low_risk_threshold");
        }
        if !(self.sizing.multiplier > 0.0 && self.sizing.multiplier <= 1.0) {
            bail!("sizing.multiplier must be in (0, 1], got {}", self.sizing.multiplier);
        }
        if !(self.sizing.max_bet_fraction > 0.0 && self.sizing.max_bet_fraction <= 1.0) {
            bail!(
                "sizing.max_bet_fraction must be in (0, 1], got {}",
                self.sizing.max_bet_fraction
            );
        }
        if !(0.0..=1.0).contains(&self.sizing.correlation_penalty) {
            bail!(
                "sizing.correlation_penalty must be in [0, 1], got {}",
                self.sizing.correlation_penalty
            );
        }
        if !(0.0..=1.0).contains(&self.sizing.range_spread) {
            bail!("sizing.range_spread must be in [0, 1], got {}", self.sizing.range_spread);
        }
        if !(0.0..=1.0).contains(&self.edge.min_estimate_confidence) {
            bail!("edge.min_estimate_confidence must be in [0, 1]");
        }
        if self.movement.max_points == 0 {
            bail!("movement.max_points must be at least 1");
        }
        if self.refresh.max_attempts == 0 {
            bail!("refresh.max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Assemble the analysis pipeline from this configuration.
    pub fn build_analyzer(&self) -> ParlayAnalyzer {
        ParlayAnalyzer::new(
            self.parlay.clone(),
            CorrelationAnalyzer::new(self.correlation.clone()),
            MultiBookOptimizer::new(self.optimizer.clone()),
            EdgeDetector::new(self.edge.clone()),
            BetSizer::new(self.sizing.clone()),
        )
    }
}
