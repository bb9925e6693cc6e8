//! End-to-end analysis of parlays against multi-book snapshots.

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;

use parlay_engine::config::EngineConfig;
use parlay_engine::strategy::correlation::CorrelationRisk;
use parlay_engine::strategy::edge::FairSource;
use parlay_engine::strategy::kelly::RiskLevel;
use parlay_engine::strategy::{ParlayAnalyzer, ParlayRequest};
use parlay_engine::types::*;

use crate::mock_feed::{moneyline, quote_at, three_book_slate};

// ---- helpers ----

fn analyzer() -> ParlayAnalyzer {
    EngineConfig::default().build_analyzer()
}

fn dk_leg(id: &str, event: &str, selection: &str) -> Leg {
    Leg::new(id, "basketball", moneyline("dk", event, selection, -110)).unwrap()
}

fn slate_request() -> ParlayRequest {
    let parlay = Parlay::new(
        vec![
            dk_leg("lal", "nba-lal-bos", "LAL"),
            dk_leg("nyk", "nba-nyk-mia", "NYK"),
        ],
        dec!(25),
    );
    ParlayRequest::new(parlay, dec!(1000))
}

// ---- tests ----

#[test]
fn test_line_shopping_across_three_books() {
    let snapshot = QuoteSnapshot::from_quotes(three_book_slate());
    let analysis = analyzer()
        .analyze(&slate_request(), &snapshot, Utc::now())
        .unwrap();

    let opt = &analysis.optimization;
    assert_eq!(opt.leg("lal").unwrap().best_source_id, "fd");
    assert_eq!(opt.leg("lal").unwrap().best_odds, 110);
    assert_eq!(opt.leg("nyk").unwrap().best_source_id, "mgm");
    assert_eq!(opt.leg("nyk").unwrap().best_odds, 105);
    assert_eq!(opt.leg("lal").unwrap().alternatives.len(), 2);
    assert!(opt.improvement_percent > 0.0);
    assert_eq!(opt.recommendations.len(), 3);
    assert!(opt.optimized_odds.total_decimal_odds > analysis.combined.total_decimal_odds);

    assert!(analysis.warnings.is_empty(), "{:?}", analysis.warnings);
    assert!(analysis
        .leg_ev
        .iter()
        .all(|l| l.fair_source == FairSource::Devigged && l.ev.has_edge));
    assert!(analysis.parlay_ev.has_edge);

    assert_eq!(analysis.correlation.risk, CorrelationRisk::Low);
    assert!(analysis.sizing.has_bet());
    assert_eq!(analysis.sizing.risk_level, Some(RiskLevel::Conservative));
    assert!(analysis.sizing.recommended_bet <= dec!(50));
    assert!(analysis.potential_payout > dec!(100));
}

#[test]
fn test_raw_legs_normalise_into_analysis() {
    let now = Utc::now().to_rfc3339();
    let json = format!(
        r#"[
            {{"id": "lal", "event_id": "nba-lal-bos", "sport": "basketball", "market": "ML",
              "selection": "LAL", "source_id": "dk", "american_odds": -110, "observed_at": "{now}"}},
            {{"id": "nyk", "event_id": "nba-nyk-mia", "sport": "basketball", "market": "h2h",
              "selection": "NYK", "source_id": "dk", "american_odds": -110, "observed_at": "{now}"}}
        ]"#
    );
    let raw: Vec<RawLeg> = serde_json::from_str(&json).unwrap();
    let parlay = Parlay::from_raw(raw, dec!(25)).unwrap();
    let request = ParlayRequest::new(parlay, dec!(1000));

    let snapshot = QuoteSnapshot::from_quotes(three_book_slate());
    let from_raw = analyzer().analyze(&request, &snapshot, Utc::now()).unwrap();
    assert_eq!(from_raw.optimization.leg("lal").unwrap().best_odds, 110);
}

#[test]
fn test_conflicting_legs_flagged_and_stake_cut() {
    let estimates = |req: ParlayRequest| {
        req.with_estimate("a", ModelEstimate { probability: 0.6, confidence: 0.9 })
            .with_estimate("b", ModelEstimate { probability: 0.6, confidence: 0.9 })
    };
    let independent = estimates(ParlayRequest::new(
        Parlay::new(
            vec![dk_leg("a", "nba-lal-bos", "LAL"), dk_leg("b", "nba-nyk-mia", "NYK")],
            dec!(10),
        ),
        dec!(1000),
    ));
    let conflicting = estimates(ParlayRequest::new(
        Parlay::new(
            vec![dk_leg("a", "nba-lal-bos", "LAL"), dk_leg("b", "nba-lal-bos", "BOS")],
            dec!(10),
        ),
        dec!(1000),
    ));

    let a = analyzer();
    let snapshot = QuoteSnapshot::new();
    let clean = a.analyze(&independent, &snapshot, Utc::now()).unwrap();
    let conflict = a.analyze(&conflicting, &snapshot, Utc::now()).unwrap();

    assert!(conflict.correlation.independence_score <= 50.0);
    assert_eq!(conflict.correlation.risk, CorrelationRisk::High);
    assert!(conflict.sizing.recommended_bet < clean.sizing.recommended_bet);
}

#[test]
fn test_stale_and_missing_quotes_are_warnings() {
    let old = Utc::now() - Duration::minutes(5);
    let snapshot = QuoteSnapshot::from_quotes(vec![
        quote_at("fd", "nba-lal-bos", Market::Moneyline, "LAL", 120, old),
        quote_at("fd", "nba-lal-bos", Market::Moneyline, "BOS", -140, old),
    ]);
    let analysis = analyzer()
        .analyze(&slate_request(), &snapshot, Utc::now())
        .unwrap();

    assert!(analysis.warnings.iter().any(|w| matches!(
        w,
        EngineWarning::StaleData { leg_id, .. } if leg_id == "lal"
    )));
    assert!(analysis.warnings.contains(&EngineWarning::NoQuotesAvailable {
        leg_id: "nyk".into()
    }));
    assert!(analysis.warnings.contains(&EngineWarning::NoOpposingSide {
        leg_id: "nyk".into()
    }));
}

#[test]
fn test_analysis_is_deterministic() {
    let snapshot = QuoteSnapshot::from_quotes(three_book_slate());
    let now = Utc::now();
    let a = analyzer();
    let first = a.analyze(&slate_request(), &snapshot, now).unwrap();
    let second = a.analyze(&slate_request(), &snapshot, now).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_analysis_serialises() {
    let snapshot = QuoteSnapshot::from_quotes(three_book_slate());
    let analysis = analyzer()
        .analyze(&slate_request(), &snapshot, Utc::now())
        .unwrap();
    let json = serde_json::to_value(&analysis).unwrap();
    assert!(json["correlation"]["independence_score"].is_number());
    assert_eq!(json["sizing"]["risk_level"], "conservative");
}
