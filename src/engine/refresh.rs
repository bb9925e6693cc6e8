//! Periodic quote refresh.
//!
//! Each cycle fetches quotes for the watched parlay, re-runs the analysis
//! and commits the result. Cycles are numbered: starting a cycle aborts the
//! previous cycle's in-flight fetch, and a cycle may only commit while it is
//! still the newest one. Failed cycles keep the last good analysis and flag
//! the error instead of clearing state.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use futures::future::{AbortHandle, Abortable};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::feed::QuoteFeed;
use super::movement::{LineMovementRecord, LineMovementTracker, MovementConfig};
use crate::strategy::{ParlayAnalysis, ParlayAnalyzer, ParlayRequest};
use crate::types::{Leg, Quote, QuoteSnapshot};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Seconds between refresh cycles.
    pub interval_secs: u64,
    /// Fetch attempts per cycle, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_backoff_ms: u64,
    /// A committed analysis older than this is reported stale.
    pub freshness_secs: i64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: 20,
            max_attempts: 3,
            base_backoff_ms: 500,
            freshness_secs: 60,
        }
    }
}

impl RefreshConfig {
    /// Delay before retry number `attempt` (1-based): `base × 2^(attempt − 1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(1u64 << exponent))
    }
}

/// Fetch quotes, retrying with exponential backoff.
pub async fn fetch_with_retry(
    feed: &dyn QuoteFeed,
    legs: &[Leg],
    config: &RefreshConfig,
) -> Result<Vec<Quote>> {
    let attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = config.backoff(attempt);
            debug!(
                feed = feed.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying quote fetch"
            );
            tokio::time::sleep(delay).await;
        }

        match feed.fetch_quotes(legs).await {
            Ok(quotes) => return Ok(quotes),
            Err(e) => {
                warn!(feed = feed.name(), attempt, error = %e, "Quote fetch failed");
                last_error = Some(e);
            }
        }
    }

    let error = last_error.unwrap_or_else(|| anyhow!("no fetch attempted"));
    Err(error.context(format!("{} failed after {} attempts", feed.name(), attempts)))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshStatus {
    /// Newest cycle started.
    pub generation: u64,
    /// Cycle whose analysis is currently held (0 = none yet).
    pub committed_generation: u64,
    pub last_updated: Option<DateTime<Utc>>,
    /// No analysis yet, or the held one is older than the freshness window.
    pub stale: bool,
    /// Error from the most recent failed cycle, cleared on the next commit.
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Committed { generation: u64 },
    /// A newer cycle started before this one finished; nothing was written.
    Superseded { generation: u64 },
    Failed { generation: u64, error: String },
}

struct RefreshState {
    latest: Option<ParlayAnalysis>,
    last_updated: Option<DateTime<Utc>>,
    last_error: Option<String>,
    committed_generation: u64,
    consecutive_failures: u32,
    tracker: LineMovementTracker,
}

// ---------------------------------------------------------------------------
// Refresher
// ---------------------------------------------------------------------------

struct Inner {
    feed: Arc<dyn QuoteFeed>,
    analyzer: ParlayAnalyzer,
    config: RefreshConfig,
    request: Mutex<ParlayRequest>,
    generation: AtomicU64,
    in_flight: Mutex<Option<AbortHandle>>,
    state: Mutex<RefreshState>,
}

/// Keeps one parlay's analysis current against a live feed.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct QuoteRefresher {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl QuoteRefresher {
    pub fn new(
        feed: Arc<dyn QuoteFeed>,
        analyzer: ParlayAnalyzer,
        request: ParlayRequest,
        config: RefreshConfig,
        movement: MovementConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                feed,
                analyzer,
                config,
                request: Mutex::new(request),
                generation: AtomicU64::new(0),
                in_flight: Mutex::new(None),
                state: Mutex::new(RefreshState {
                    latest: None,
                    last_updated: None,
                    last_error: None,
                    committed_generation: 0,
                    consecutive_failures: 0,
                    tracker: LineMovementTracker::new(movement),
                }),
            }),
        }
    }

    /// Replace the watched parlay. Takes effect from the next cycle.
    pub fn set_request(&self, request: ParlayRequest) {
        *lock(&self.inner.request) = request;
    }

    /// Run one refresh cycle now.
    pub async fn refresh_now(&self) -> CycleOutcome {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let (handle, registration) = AbortHandle::new_pair();
        if let Some(previous) = lock(&self.inner.in_flight).replace(handle) {
            previous.abort();
            trace!(generation, "Aborted previous in-flight fetch");
        }

        let request = lock(&self.inner.request).clone();
        let fetch = fetch_with_retry(
            self.inner.feed.as_ref(),
            &request.parlay.legs,
            &self.inner.config,
        );

        let quotes = match Abortable::new(fetch, registration).await {
            Err(_aborted) => {
                debug!(generation, "Cycle superseded during fetch");
                return CycleOutcome::Superseded { generation };
            }
            Ok(Err(e)) => return self.fail(generation, format!("{e:#}")),
            Ok(Ok(quotes)) => quotes,
        };

        let now = Utc::now();
        let snapshot = QuoteSnapshot::from_quotes(quotes);
        let analysis = match self.inner.analyzer.analyze(&request, &snapshot, now) {
            Ok(analysis) => analysis,
            Err(e) => return self.fail(generation, e.to_string()),
        };

        let mut state = lock(&self.inner.state);
        if !self.is_current(generation) {
            debug!(generation, "Cycle superseded before commit");
            return CycleOutcome::Superseded { generation };
        }

        for quote in snapshot.iter() {
            if let Err(e) = state.tracker.record(quote) {
                trace!(source = %quote.source_id, error = %e, "Quote not tracked");
            }
        }
        state.tracker.prune(now);

        info!(
            generation,
            quotes = snapshot.len(),
            odds = analysis.optimization.optimized_odds.total_american_odds,
            ev = format!("{:.2}%", analysis.parlay_ev.expected_value_percent),
            "Refresh committed"
        );

        state.latest = Some(analysis);
        state.last_updated = Some(now);
        state.last_error = None;
        state.committed_generation = generation;
        state.consecutive_failures = 0;

        CycleOutcome::Committed { generation }
    }

    /// Record a failed cycle, keeping the last good analysis.
    fn fail(&self, generation: u64, error: String) -> CycleOutcome {
        let mut state = lock(&self.inner.state);
        if !self.is_current(generation) {
            return CycleOutcome::Superseded { generation };
        }
        state.consecutive_failures += 1;
        error!(
            generation,
            failures = state.consecutive_failures,
            error = %error,
            retained = state.latest.is_some(),
            "Refresh failed"
        );
        state.last_error = Some(error.clone());
        CycleOutcome::Failed { generation, error }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
    }

    /// Abort any in-flight fetch and prevent running cycles from committing.
    pub fn cancel(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = lock(&self.inner.in_flight).take() {
            handle.abort();
        }
    }

    /// Refresh every `interval_secs` until `shutdown` resolves.
    ///
    /// Each tick runs as its own task so a slow fetch never delays the next
    /// tick; the newer cycle aborts the slower one instead.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let period = Duration::from_secs(self.inner.config.interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        tokio::pin!(shutdown);

        info!(
            feed = self.inner.feed.name(),
            interval_secs = period.as_secs(),
            "Quote refresh loop started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let refresher = self.clone();
                    tokio::spawn(async move {
                        let outcome = refresher.refresh_now().await;
                        debug!(?outcome, "Refresh cycle finished");
                    });
                }
                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping quote refresh");
                    self.cancel();
                    break;
                }
            }
        }
    }

    /// Most recently committed analysis, if any.
    pub fn latest(&self) -> Option<ParlayAnalysis> {
        lock(&self.inner.state).latest.clone()
    }

    pub fn status(&self, now: DateTime<Utc>) -> RefreshStatus {
        let state = lock(&self.inner.state);
        let freshness = chrono::Duration::seconds(self.inner.config.freshness_secs);
        let stale = state
            .last_updated
            .map_or(true, |updated| now - updated > freshness);
        RefreshStatus {
            generation: self.inner.generation.load(Ordering::SeqCst),
            committed_generation: state.committed_generation,
            last_updated: state.last_updated,
            stale,
            last_error: state.last_error.clone(),
            consecutive_failures: state.consecutive_failures,
        }
    }

    /// Line movement for one (leg, source) pair across committed cycles.
    pub fn movement(&self, leg_key: &str, source_id: &str) -> Option<LineMovementRecord> {
        lock(&self.inner.state).tracker.movement(leg_key, source_id)
    }

    /// Line movement for every source quoting `leg_key`.
    pub fn movements_for(&self, leg_key: &str) -> Vec<LineMovementRecord> {
        lock(&self.inner.state).tracker.movements_for(leg_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::feed::MockQuoteFeed;
    use crate::types::{Market, Parlay};
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;

    // ---- helpers ----

    fn make_quote(source: &str, event: &str, selection: &str, odds: i32) -> Quote {
        Quote {
            source_id: source.into(),
            event_id: event.into(),
            market: Market::Moneyline,
            selection: selection.into(),
            american_odds: odds,
            observed_at: Utc::now(),
        }
    }

    fn make_request() -> ParlayRequest {
        let legs = vec![
            Leg::new("a", "nba", make_quote("dk", "e1", "LAL", -110)).unwrap(),
            Leg::new("b", "nba", make_quote("dk", "e2", "NYK", -110)).unwrap(),
        ];
        ParlayRequest::new(Parlay::new(legs, dec!(10)), dec!(1000))
    }

    fn feed_quotes() -> Vec<Quote> {
        vec![
            make_quote("fd", "e1", "LAL", -105),
            make_quote("fd", "e1", "BOS", -115),
            make_quote("fd", "e2", "NYK", 100),
            make_quote("fd", "e2", "MIA", -120),
        ]
    }

    fn fast_config() -> RefreshConfig {
        RefreshConfig {
            base_backoff_ms: 1,
            ..RefreshConfig::default()
        }
    }

    fn make_refresher(feed: MockQuoteFeed) -> QuoteRefresher {
        let config = EngineConfig::default();
        QuoteRefresher::new(
            Arc::new(feed),
            config.build_analyzer(),
            make_request(),
            fast_config(),
            config.movement.clone(),
        )
    }

    fn named_feed() -> MockQuoteFeed {
        let mut feed = MockQuoteFeed::new();
        feed.expect_name().return_const("mock".to_string());
        feed
    }

    // ---- tests ----

    #[test]
    fn test_backoff_doubles() {
        let config = RefreshConfig {
            base_backoff_ms: 500,
            ..RefreshConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(500));
        assert_eq!(config.backoff(2), Duration::from_millis(1000));
        assert_eq!(config.backoff(3), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_fetch_with_retry_gives_up() {
        let mut feed = named_feed();
        feed.expect_fetch_quotes()
            .times(3)
            .returning(|_| Err(anyhow!("timeout")));
        let legs = make_request().parlay.legs;

        let result = fetch_with_retry(&feed, &legs, &fast_config()).await;
        let error = tokio_test::assert_err!(result);
        let message = format!("{error:#}");
        assert!(message.contains("mock failed after 3 attempts"));
        assert!(message.contains("timeout"));
    }

    #[tokio::test]
    async fn test_fetch_with_retry_single_attempt() {
        let mut feed = named_feed();
        feed.expect_fetch_quotes()
            .times(1)
            .returning(|_| Ok(feed_quotes()));
        let legs = make_request().parlay.legs;
        let config = RefreshConfig {
            max_attempts: 1,
            ..fast_config()
        };

        let quotes = tokio_test::assert_ok!(fetch_with_retry(&feed, &legs, &config).await);
        assert_eq!(quotes.len(), 4);
    }

    #[tokio::test]
    async fn test_successful_cycle_commits() {
        let mut feed = named_feed();
        feed.expect_fetch_quotes()
            .times(1)
            .returning(|_| Ok(feed_quotes()));
        let refresher = make_refresher(feed);

        assert_eq!(refresher.refresh_now().await, CycleOutcome::Committed { generation: 1 });

        let analysis = refresher.latest().unwrap();
        assert_eq!(analysis.optimization.per_leg[0].best_source_id, "fd");
        let status = refresher.status(Utc::now());
        assert_eq!(status.committed_generation, 1);
        assert!(!status.stale);
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut feed = named_feed();
        feed.expect_fetch_quotes().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow!("connection reset"))
            } else {
                Ok(feed_quotes())
            }
        });
        let refresher = make_refresher(feed);

        assert!(matches!(refresher.refresh_now().await, CycleOutcome::Committed { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failure_keeps_last_good_analysis() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut feed = named_feed();
        feed.expect_fetch_quotes().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(feed_quotes())
            } else {
                Err(anyhow!("feed down"))
            }
        });
        let refresher = make_refresher(feed);

        refresher.refresh_now().await;
        let good = refresher.latest().unwrap();

        let outcome = refresher.refresh_now().await;
        assert!(matches!(outcome, CycleOutcome::Failed { generation: 2, .. }));
        // 1 success + 3 attempts
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        assert_eq!(refresher.latest().unwrap(), good);
        let status = refresher.status(Utc::now());
        assert_eq!(status.committed_generation, 1);
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.last_error.unwrap().contains("feed down"));
    }

    #[tokio::test]
    async fn test_invalid_parlay_fails_cycle() {
        let mut feed = named_feed();
        feed.expect_fetch_quotes().returning(|_| Ok(feed_quotes()));
        let refresher = make_refresher(feed);

        let mut request = make_request();
        request.parlay.legs.truncate(1);
        refresher.set_request(request);

        match refresher.refresh_now().await {
            CycleOutcome::Failed { error, .. } => assert!(error.contains("Insufficient legs")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(refresher.latest().is_none());
    }

    #[tokio::test]
    async fn test_commits_feed_line_movement() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut feed = named_feed();
        feed.expect_fetch_quotes().returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst) as i64;
            let mut q = make_quote("fd", "e1", "LAL", -120 + 10 * n as i32);
            q.observed_at = Utc::now() + chrono::Duration::seconds(n);
            Ok(vec![q])
        });
        let refresher = make_refresher(feed);

        refresher.refresh_now().await;
        refresher.refresh_now().await;

        let key = make_quote("fd", "e1", "LAL", -110).leg_key();
        let record = refresher.movement(&key, "fd").unwrap();
        assert_eq!(record.series.len(), 2);
        assert_eq!(
            record.direction,
            crate::engine::movement::MovementDirection::Improving
        );
    }

    #[test]
    fn test_status_stale_before_first_commit() {
        let refresher = make_refresher(named_feed());
        let status = refresher.status(Utc::now());
        assert!(status.stale);
        assert_eq!(status.generation, 0);
        assert!(refresher.latest().is_none());
    }

    #[test]
    fn test_cancel_advances_generation() {
        let refresher = make_refresher(named_feed());
        refresher.cancel();
        assert_eq!(refresher.status(Utc::now()).generation, 1);
    }
}
