//! Ingestion side of the quote feed.
//!
//! The publisher sits behind a broker streaming session and fans every tick out
//! to subscriber processes over a local stream socket. It wires together:
//!
//! - `session`: the broker capability seam (`BrokerSession`) and the callbacks
//!   the session drives (`SessionEvents`).
//! - `publisher`: `QuoteFeedPublisher`: merge into the local cache, broadcast on
//!   `quote-update`, pass orders through on `order-update`, mirror to the sink.
//! - `broadcaster`: the transport's publishing end: accept loop plus one writer
//!   thread per subscriber.
//! - `sink`: best-effort durable sink (`QuoteSink`) behind a worker thread.
//! - `status`: periodic last-quote/last-received log line.
//! - `simulator`: a random-walk `BrokerSession` for local runs.
#![warn(missing_docs)]
pub mod broadcaster;
pub mod publisher;
pub mod session;
pub mod simulator;
pub mod sink;
pub mod status;

pub use publisher::{PublisherConfig, QuoteFeedPublisher};
pub use session::{BrokerSession, SessionEvents};
pub use sink::{JsonLinesSink, NoopSink, QuoteSink};
