//! Mock quote feed for integration testing.
//!
//! Serves a controllable set of quotes from memory, with optional
//! per-call latency and forced errors.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parlay_engine::engine::QuoteFeed;
use parlay_engine::types::{Leg, Market, Quote};

/// In-memory feed. Clones share state, so a test can keep a handle while
/// the refresher owns another.
#[derive(Clone)]
pub struct MockFeed {
    name: String,
    quotes: Arc<Mutex<Vec<Quote>>>,
    /// Latency applied to each fetch, in call order; the last entry repeats.
    delays: Arc<Mutex<Vec<Duration>>>,
    /// If set, every fetch returns this error.
    force_error: Arc<Mutex<Option<String>>>,
    calls: Arc<AtomicUsize>,
}

impl MockFeed {
    pub fn new(name: &str, quotes: Vec<Quote>) -> Self {
        Self {
            name: name.to_string(),
            quotes: Arc::new(Mutex::new(quotes)),
            delays: Arc::new(Mutex::new(Vec::new())),
            force_error: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_quotes(&self, quotes: Vec<Quote>) {
        *self.quotes.lock().unwrap() = quotes;
    }

    pub fn set_delays(&self, delays: Vec<Duration>) {
        *self.delays.lock().unwrap() = delays;
    }

    /// Force all subsequent fetches to fail.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteFeed for MockFeed {
    async fn fetch_quotes(&self, _legs: &[Leg]) -> Result<Vec<Quote>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = {
            let delays = self.delays.lock().unwrap();
            delays.get(call).or(delays.last()).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        Ok(self.quotes.lock().unwrap().clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn quote_at(
    source: &str,
    event: &str,
    market: Market,
    selection: &str,
    odds: i32,
    at: DateTime<Utc>,
) -> Quote {
    Quote {
        source_id: source.to_string(),
        event_id: event.to_string(),
        market,
        selection: selection.to_string(),
        american_odds: odds,
        observed_at: at,
    }
}

pub fn moneyline(source: &str, event: &str, selection: &str, odds: i32) -> Quote {
    quote_at(source, event, Market::Moneyline, selection, odds, Utc::now())
}

/// Three books pricing both sides of two NBA moneylines. "fd" is soft on
/// LAL and "mgm" on NYK.
pub fn three_book_slate() -> Vec<Quote> {
    vec![
        moneyline("dk", "nba-lal-bos", "LAL", -110),
        moneyline("dk", "nba-lal-bos", "BOS", -110),
        moneyline("fd", "nba-lal-bos", "LAL", 110),
        moneyline("fd", "nba-lal-bos", "BOS", -130),
        moneyline("mgm", "nba-lal-bos", "LAL", -105),
        moneyline("mgm", "nba-lal-bos", "BOS", -115),
        moneyline("dk", "nba-nyk-mia", "NYK", -110),
        moneyline("dk", "nba-nyk-mia", "MIA", -110),
        moneyline("fd", "nba-nyk-mia", "NYK", -108),
        moneyline("fd", "nba-nyk-mia", "MIA", -112),
        moneyline("mgm", "nba-nyk-mia", "NYK", 105),
        moneyline("mgm", "nba-nyk-mia", "MIA", -125),
    ]
}
