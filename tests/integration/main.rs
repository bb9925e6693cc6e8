//! Integration tests: full pipeline and refresh loop against an in-memory feed.

mod mock_feed;
mod pipeline;
mod refresh;
