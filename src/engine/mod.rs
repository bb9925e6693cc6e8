//! Live engine: quote feeds, the refresh loop, and line movement history.

pub mod feed;
pub mod movement;
pub mod refresh;

pub use feed::QuoteFeed;
pub use movement::{LineMovementRecord, LineMovementTracker, MovementConfig, MovementDirection};
pub use refresh::{CycleOutcome, QuoteRefresher, RefreshConfig, RefreshStatus};
