//! Subscriber-side quote cache.
//!
//! The aggregator is a replica of the publisher's cache, rebuilt from the
//! `quote-update` stream. The receive worker is its only writer; bar synthesis,
//! liveness checks and option searches read it from other threads, so all state
//! sits behind one `RwLock`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use quote_common::{
    Clock, FeedError, FeedTimes, InstrumentKey, QuoteMessage, QuoteRecord, RawTick, Result,
};

/// One cached instrument: merged state plus the tick that last touched it.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedQuote {
    /// Merged state, with increments derived against this cache.
    pub record: QuoteRecord,
    /// Raw broker tick carried by the last message.
    pub raw: RawTick,
}

#[derive(Debug, Default)]
struct AggregatorState {
    quotes: HashMap<InstrumentKey, CachedQuote>,
    latest_ois: HashMap<InstrumentKey, f64>,
    times: FeedTimes,
}

/// Replicated quote cache with its feed clocks.
pub struct QuoteAggregator {
    state: RwLock<AggregatorState>,
    clock: Arc<dyn Clock>,
}

impl QuoteAggregator {
    /// Empty cache stamping merges with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(AggregatorState::default()),
            clock,
        }
    }

    /// Decodes a `quote-update` payload and merges it.
    pub fn apply_payload(&self, payload: &[u8]) -> Result<()> {
        self.apply(QuoteMessage::from_json_bytes(payload)?)
    }

    /// Merges one message.
    ///
    /// Messages whose last price is not positive are rejected with
    /// [`FeedError::InvalidPrice`] and leave the cache untouched.
    pub fn apply(&self, message: QuoteMessage) -> Result<()> {
        if !(message.record.last_price > 0.0)
            || message.raw.last_price.is_some_and(|price| !(price > 0.0))
        {
            return Err(FeedError::InvalidPrice(message.record.key.to_string()));
        }
        let received_at = self.clock.now();
        let key = message.record.key.clone();

        let mut state = self.state.write()?;
        let record = QuoteRecord::merge(
            state.quotes.get(&key).map(|cached| &cached.record),
            &message.record.to_tick(),
            received_at,
        )?;
        if let Some(oi) = message.raw.open_interest.or(record.open_interest) {
            state.latest_ois.insert(key.clone(), oi);
        }
        state.times.record(record.quote_timestamp, received_at);
        state.quotes.insert(
            key,
            CachedQuote {
                record,
                raw: message.raw,
            },
        );
        Ok(())
    }

    /// Cached entry for a key.
    pub fn get(&self, key: &InstrumentKey) -> Option<CachedQuote> {
        self.state.read().ok()?.quotes.get(key).cloned()
    }

    /// Copy of every cached entry.
    pub fn snapshot(&self) -> Vec<(InstrumentKey, CachedQuote)> {
        match self.state.read() {
            Ok(state) => state
                .quotes
                .iter()
                .map(|(key, cached)| (key.clone(), cached.clone()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Last known open interest for a key, kept even when later ticks omit it.
    pub fn latest_open_interest(&self, key: &InstrumentKey) -> Option<f64> {
        self.state.read().ok()?.latest_ois.get(key).copied()
    }

    /// Feed clocks.
    pub fn times(&self) -> FeedTimes {
        self.state.read().map(|s| s.times).unwrap_or_default()
    }

    /// Resolved timestamp of the last merged quote.
    pub fn last_quote_time(&self) -> Option<DateTime<Utc>> {
        self.times().last_quote
    }

    /// Number of cached instruments.
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.quotes.len()).unwrap_or(0)
    }

    /// `true` before the first quote.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
