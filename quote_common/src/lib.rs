//!
//! Common types and utilities shared by the quote publisher and subscriber.
//!
//! This crate aggregates:
//! - `error`: unified error type `FeedError` used across the workspace.
//! - `result`: handy `Result<T, FeedError>` alias.
//! - `instruments`: instrument keys and the instrument ↔ token mapping.
//! - `tick`: raw broker ticks and their normalization.
//! - `quote`: merged per-instrument state and the merge rule.
//! - `option`: option contract metadata and the resolver seam.
//! - `clock`: injectable wall clock.
//! - `wire`: topics, envelopes and stream framing.
//! - `net`: transport addresses and socket plumbing.
#![warn(missing_docs)]
pub mod clock;
pub mod error;
pub mod instruments;
pub mod net;
pub mod option;
pub mod quote;
pub mod result;
pub mod tick;
pub mod wire;

pub use clock::{Clock, FeedTimes, ManualClock, SystemClock};
pub use error::FeedError;
pub use instruments::{InstrumentKey, TokenMapping};
pub use net::FeedAddress;
pub use option::{OptionContract, OptionResolver, OptionType, SymbolOptionResolver};
pub use quote::{QuoteMessage, QuoteRecord};
pub use result::Result;
pub use tick::RawTick;
pub use wire::{Envelope, Topic};
