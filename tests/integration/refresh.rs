//! Refresh loop behaviour: supersession, retry, failure retention, shutdown.

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use parlay_engine::config::EngineConfig;
use parlay_engine::engine::{CycleOutcome, MovementDirection, QuoteRefresher, RefreshConfig};
use parlay_engine::strategy::ParlayRequest;
use parlay_engine::types::{Leg, Parlay};

use crate::mock_feed::{moneyline, three_book_slate, MockFeed};

// ---- helpers ----

fn make_request() -> ParlayRequest {
    let legs = vec![
        Leg::new("lal", "basketball", moneyline("dk", "nba-lal-bos", "LAL", -110)).unwrap(),
        Leg::new("nyk", "basketball", moneyline("dk", "nba-nyk-mia", "NYK", -110)).unwrap(),
    ];
    ParlayRequest::new(Parlay::new(legs, dec!(10)), dec!(500))
}

fn make_refresher(feed: &MockFeed, interval_secs: u64) -> QuoteRefresher {
    let config = EngineConfig::default();
    QuoteRefresher::new(
        Arc::new(feed.clone()),
        config.build_analyzer(),
        make_request(),
        RefreshConfig {
            interval_secs,
            base_backoff_ms: 1,
            ..RefreshConfig::default()
        },
        config.movement.clone(),
    )
}

// ---- tests ----

#[tokio::test]
async fn test_newer_cycle_supersedes_slow_fetch() {
    let feed = MockFeed::new("books", three_book_slate());
    feed.set_delays(vec![Duration::from_millis(300), Duration::from_millis(5)]);
    let refresher = make_refresher(&feed, 20);

    let slow = refresher.clone();
    let first = tokio::spawn(async move { slow.refresh_now().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = refresher.refresh_now().await;
    let first = first.await.unwrap();

    assert_eq!(first, CycleOutcome::Superseded { generation: 1 });
    assert_eq!(second, CycleOutcome::Committed { generation: 2 });
    assert_eq!(refresher.status(Utc::now()).committed_generation, 2);
}

#[tokio::test]
async fn test_failed_cycle_keeps_last_good_then_recovers() {
    let feed = MockFeed::new("books", three_book_slate());
    let refresher = make_refresher(&feed, 20);

    assert_eq!(refresher.refresh_now().await, CycleOutcome::Committed { generation: 1 });
    let good = refresher.latest().unwrap();

    feed.set_error("upstream 503");
    let outcome = refresher.refresh_now().await;
    assert!(matches!(outcome, CycleOutcome::Failed { generation: 2, .. }));
    // One successful call, then the full retry budget
    assert_eq!(feed.calls(), 1 + 3);

    assert_eq!(refresher.latest().unwrap(), good);
    let status = refresher.status(Utc::now());
    assert_eq!(status.committed_generation, 1);
    assert_eq!(status.consecutive_failures, 1);
    assert!(status.last_error.as_deref().unwrap().contains("upstream 503"));

    feed.clear_error();
    assert_eq!(refresher.refresh_now().await, CycleOutcome::Committed { generation: 3 });
    let status = refresher.status(Utc::now());
    assert!(status.last_error.is_none());
    assert_eq!(status.consecutive_failures, 0);
}

#[tokio::test]
async fn test_status_goes_stale_after_freshness_window() {
    let feed = MockFeed::new("books", three_book_slate());
    let refresher = make_refresher(&feed, 20);
    refresher.refresh_now().await;

    assert!(!refresher.status(Utc::now()).stale);
    assert!(refresher.status(Utc::now() + ChronoDuration::minutes(2)).stale);
}

#[tokio::test]
async fn test_line_movement_accumulates_across_cycles() {
    let feed = MockFeed::new("books", vec![moneyline("fd", "nba-lal-bos", "LAL", -150)]);
    let refresher = make_refresher(&feed, 20);
    refresher.refresh_now().await;

    tokio::time::sleep(Duration::from_millis(5)).await;
    feed.set_quotes(vec![moneyline("fd", "nba-lal-bos", "LAL", -125)]);
    refresher.refresh_now().await;

    let key = moneyline("fd", "nba-lal-bos", "LAL", -150).leg_key();
    let record = refresher.movement(&key, "fd").unwrap();
    assert_eq!(record.series.len(), 2);
    assert_eq!(record.direction, MovementDirection::Improving);
    assert_eq!(refresher.movements_for(&key).len(), 1);
}

#[tokio::test]
async fn test_run_loop_refreshes_until_shutdown() {
    let feed = MockFeed::new("books", three_book_slate());
    let refresher = make_refresher(&feed, 1);

    let (tx, rx) = oneshot::channel::<()>();
    let runner = refresher.clone();
    let handle = tokio::spawn(async move {
        runner
            .run(async {
                let _ = rx.await;
            })
            .await;
    });

    // The first tick fires immediately.
    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(()).unwrap();
    handle.await.unwrap();

    let status = refresher.status(Utc::now());
    assert_eq!(status.committed_generation, 1);
    // Shutdown cancels, so the generation moves past the last cycle.
    assert_eq!(status.generation, 2);
    assert!(refresher.latest().is_some());
    assert!(feed.calls() >= 1);
}
