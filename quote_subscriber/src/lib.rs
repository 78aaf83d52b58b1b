//! Consumption side of the quote feed.
//!
//! A subscriber connects to a publisher's feed address, replicates its quote
//! cache from the `quote-update` stream and answers queries from the replica:
//!
//! - `aggregator`: `QuoteAggregator`, the replicated cache and its clocks.
//! - `receiver`: the background worker that is the cache's only writer.
//! - `bars`: poll-driven tick bars, at most one batch per upstream quote time.
//! - `liveness`: staleness check on the last quote time.
//! - `nearest`: nearest-premium option search.
//! - `feed`: `LiveQuoteFeed`, the facade tying the above together.
#![warn(missing_docs)]
pub mod aggregator;
pub mod bars;
pub mod feed;
pub mod liveness;
pub mod nearest;
pub mod receiver;

pub use aggregator::{CachedQuote, QuoteAggregator};
pub use bars::{Bar, BarBatch, BarSynthesizer};
pub use feed::{LiveQuoteFeed, LiveQuoteFeedBuilder};
pub use nearest::NearestOption;
pub use receiver::FeedOptions;
