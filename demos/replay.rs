//! Replay a slate file through the live refresh loop.
//!
//! Reads legs, bankroll and quotes from a JSON slate, then re-reads the
//! quotes on every refresh cycle so edits to the file show up as line
//! movement. Stops on Ctrl+C.
//!
//!     cargo run --example replay -- demos/slate.json

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use parlay_engine::config::EngineConfig;
use parlay_engine::engine::{QuoteFeed, QuoteRefresher};
use parlay_engine::strategy::ParlayRequest;
use parlay_engine::types::{Leg, ModelEstimate, Parlay, Quote, RawLeg};

#[derive(Debug, Deserialize)]
struct Slate {
    bankroll: Decimal,
    stake: Decimal,
    legs: Vec<RawLeg>,
    #[serde(default)]
    estimates: HashMap<String, ModelEstimate>,
    #[serde(default)]
    quotes: Vec<Quote>,
}

impl Slate {
    fn load(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read slate: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse slate: {}", path.display()))
    }
}

/// Serves the `quotes` array of the slate file, re-read on every fetch.
struct FileFeed {
    path: PathBuf,
}

#[async_trait]
impl QuoteFeed for FileFeed {
    async fn fetch_quotes(&self, _legs: &[Leg]) -> Result<Vec<Quote>> {
        Ok(Slate::load(&self.path)?.quotes)
    }

    fn name(&self) -> &str {
        "slate-file"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();
    init_logging();

    let cfg = match EngineConfig::load("config.toml") {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, "Using default configuration");
            EngineConfig::default()
        }
    };

    let path: PathBuf = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/slate.json".to_string())
        .into();
    let slate = Slate::load(&path)?;

    let parlay = Parlay::from_raw(slate.legs, slate.stake).context("Invalid leg in slate")?;
    let mut request = ParlayRequest::new(parlay, slate.bankroll);
    request.estimates = slate.estimates;
    let leg_keys: Vec<String> = request.parlay.legs.iter().map(Leg::key).collect();

    let refresher = QuoteRefresher::new(
        Arc::new(FileFeed { path }),
        cfg.build_analyzer(),
        request,
        cfg.refresh.clone(),
        cfg.movement.clone(),
    );

    let runner = refresher.clone();
    let loop_handle = tokio::spawn(async move {
        runner
            .run(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;
    });

    let mut report = tokio::time::interval(Duration::from_secs(cfg.refresh.interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = report.tick() => log_latest(&refresher, &leg_keys),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    loop_handle.await.context("Refresh loop panicked")?;
    info!("Replay stopped");
    Ok(())
}

fn log_latest(refresher: &QuoteRefresher, leg_keys: &[String]) {
    let status = refresher.status(chrono::Utc::now());
    let Some(analysis) = refresher.latest() else {
        info!(generation = status.generation, "No analysis committed yet");
        return;
    };

    info!(
        generation = status.committed_generation,
        stale = status.stale,
        odds = analysis.optimization.optimized_odds.total_american_odds,
        improvement = format!("{:.2}%", analysis.optimization.improvement_percent),
        ev = format!("{:.2}%", analysis.parlay_ev.expected_value_percent),
        independence = format!("{:.0}", analysis.correlation.independence_score),
        bet = %analysis.sizing.recommended_bet.round_dp(2),
        payout = %analysis.potential_payout.round_dp(2),
        "Parlay"
    );
    for rec in &analysis.optimization.recommendations {
        info!("{rec}");
    }
    for warning in &analysis.correlation.warnings {
        warn!(legs = ?warning.leg_ids, "{}", warning.description);
    }
    for warning in &analysis.warnings {
        warn!("{warning}");
    }
    for key in leg_keys {
        for movement in refresher.movements_for(key) {
            info!(
                leg = %movement.leg_key,
                source = %movement.source_id,
                direction = %movement.direction,
                change = format!("{:.2}%", movement.change_percent),
                points = movement.series.len(),
                "Line movement"
            );
        }
    }
    if let Some(error) = status.last_error {
        warn!(%error, "Last refresh failed; showing last good analysis");
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parlay_engine=info,replay=info"));

    if std::env::var("PARLAY_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
