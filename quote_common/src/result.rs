//! `Result` alias for feed operations.
use crate::error::FeedError;

/// `Result` defaulting to [`FeedError`].
pub type Result<T, E = FeedError> = std::result::Result<T, E>;
