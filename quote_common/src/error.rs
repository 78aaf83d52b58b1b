//! Error types shared between the publisher and the subscriber.
//!
//! The `FeedError` enum unifies the failure cases of the feed: construction-time
//! configuration problems, connection timeouts, per-message decode failures,
//! sink and callback failures, and the I/O and serialization plumbing beneath
//! them. Per-message variants are logged and swallowed by the loops that see
//! them; only configuration and timeout errors are meant to reach callers.
use std::io;
use std::sync::PoisonError;

use thiserror::Error;

/// Unified error type shared by publisher and subscriber.
#[derive(Error, Debug)]
pub enum FeedError {
    /// I/O error originating from sockets or files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Requested instruments without a token mapping. Fatal at construction.
    #[error("Could not get tokens for the instruments {0:?}")]
    Configuration(Vec<String>),

    /// The broker connection did not become ready within the timeout.
    #[error("Connection not ready within {0} secs")]
    ConnectionTimeout(u64),

    /// Subscribed instruments that produced no quote before the deadline.
    #[error("No quotes received for {0:?} before the deadline")]
    SubscriptionTimeout(Vec<String>),

    /// Malformed or unexpected tick payload.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Tick rejected because its last price is absent or not positive.
    #[error("Rejected tick for {0}: last price must be positive")]
    InvalidPrice(String),

    /// Durable sink write failure.
    #[error("Sink write failed: {0}")]
    Sink(String),

    /// Failure raised while handling a broker callback.
    #[error("Callback {callback} failed: {reason}")]
    Callback {
        /// Name of the callback that failed.
        callback: &'static str,
        /// Human-readable failure description.
        reason: String,
    },

    /// A transport address could not be parsed or bound.
    #[error("Invalid feed address: {0}")]
    InvalidAddress(String),

    /// A line of the token mapping file could not be parsed.
    #[error("Parse token mappings error: {0}")]
    ParseMappings(String),

    /// Frame length above the transport limit.
    #[error("Frame of {0} bytes exceeds the transport limit")]
    FrameTooLarge(usize),

    /// Failure while decoding with `bincode` (invalid or truncated payloads, etc.).
    #[error("Bincode deserialization error: {0}")]
    BincodeDecode(#[from] bincode::error::DecodeError),

    /// Failure while encoding with `bincode`.
    #[error("Bincode serialization error: {0}")]
    BincodeEncode(#[from] bincode::error::EncodeError),

    /// Failure while encoding/decoding JSON via serde_json.
    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Error indicating a poisoned mutex/lock was encountered.
    #[error("Mutex Lock Poisoned: {0}")]
    MutexLock(String),
}

impl<T> From<PoisonError<T>> for FeedError {
    fn from(err: PoisonError<T>) -> Self {
        FeedError::MutexLock(err.to_string())
    }
}
