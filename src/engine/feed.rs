//! Quote feed abstraction.
//!
//! A feed supplies current quotes for a set of legs from one or more price
//! sources. Transport (HTTP, websocket, file replay) is the implementor's
//! concern; the engine only needs the async fetch.

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Leg, Quote};

/// Async source of quotes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    /// Fetch the latest quotes covering `legs`, from every source the feed
    /// aggregates. Quotes for other bets may be included and are ignored.
    async fn fetch_quotes(&self, legs: &[Leg]) -> Result<Vec<Quote>>;

    /// Name for logs.
    fn name(&self) -> &str;
}
