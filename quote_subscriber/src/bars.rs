//! Tick bars synthesized on demand from the aggregator cache.
//!
//! Bars are pulled, not pushed: the caller polls [`BarSynthesizer::next_bars`]
//! on its own schedule and gets a batch only when the upstream quote time has
//! moved since the previous poll. A batch holds one bar per cached instrument,
//! all stamped with the poll's wall-clock second.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use quote_common::clock::truncate_to_second;
use quote_common::{Clock, RawTick, TokenMapping};
use serde::Serialize;

use crate::aggregator::{CachedQuote, QuoteAggregator};

/// A tick bar: open, high, low and close all equal the last price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bar {
    /// Instrument id.
    pub instrument: String,
    /// Bar time, whole seconds.
    pub timestamp: DateTime<Utc>,
    /// Open.
    pub open: f64,
    /// High.
    pub high: f64,
    /// Low.
    pub low: f64,
    /// Close.
    pub close: f64,
    /// Volume traded since the previous tick.
    pub volume: u64,
    /// Open interest, falling back to the last known value.
    pub open_interest: f64,
    /// Source tick.
    pub raw: RawTick,
}

impl Bar {
    /// Tick bar for a cached quote.
    pub fn from_quote(
        instrument: impl Into<String>,
        cached: &CachedQuote,
        timestamp: DateTime<Utc>,
        open_interest: f64,
    ) -> Self {
        let price = cached.record.last_price;
        Self {
            instrument: instrument.into(),
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: cached.record.incremental_volume,
            open_interest,
            raw: cached.raw.clone(),
        }
    }
}

/// One poll's worth of bars, keyed by instrument id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarBatch {
    /// Shared bar timestamp.
    pub timestamp: DateTime<Utc>,
    /// Bars by instrument id.
    pub bars: BTreeMap<String, Bar>,
}

impl BarBatch {
    /// Bar for one instrument.
    pub fn get(&self, instrument: &str) -> Option<&Bar> {
        self.bars.get(instrument)
    }

    /// Number of bars.
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// `true` when the batch holds no bars.
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

#[derive(Debug, Default)]
struct SynthesizerState {
    last_update: Option<DateTime<Utc>>,
    next_bars_time: Option<DateTime<Utc>>,
}

/// Rate-limits bar batches to one per distinct upstream quote time.
#[derive(Debug, Default)]
pub struct BarSynthesizer {
    state: Mutex<SynthesizerState>,
}

/// Instrument id for a cache key; unmapped keys are named by the key itself.
pub(crate) fn instrument_name(mapping: &TokenMapping, key: &quote_common::InstrumentKey) -> String {
    mapping
        .instrument_for(key)
        .map_or_else(|| key.to_string(), str::to_string)
}

impl BarSynthesizer {
    /// Fresh synthesizer that has produced nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next batch of bars, or `None` when the upstream quote time has not moved
    /// since the previous call (or no quote has arrived yet).
    pub fn next_bars(
        &self,
        aggregator: &QuoteAggregator,
        mapping: &TokenMapping,
        clock: &dyn Clock,
    ) -> Option<BarBatch> {
        let last_quote = aggregator.last_quote_time()?;
        let now = {
            let mut state = self.state.lock().ok()?;
            if state.last_update == Some(last_quote) {
                return None;
            }
            let now = clock.now();
            state.last_update = Some(last_quote);
            state.next_bars_time = Some(now);
            now
        };
        let timestamp = truncate_to_second(now);

        let bars = aggregator
            .snapshot()
            .into_iter()
            .map(|(key, cached)| {
                let open_interest = cached
                    .raw
                    .open_interest
                    .or_else(|| aggregator.latest_open_interest(&key))
                    .unwrap_or(0.0);
                let instrument = instrument_name(mapping, &key);
                let bar = Bar::from_quote(instrument.as_str(), &cached, timestamp, open_interest);
                (instrument, bar)
            })
            .collect();
        Some(BarBatch { timestamp, bars })
    }

    /// Wall-clock time of the last produced batch.
    pub fn next_bars_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().ok()?.next_bars_time
    }
}
