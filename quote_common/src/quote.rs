//! Canonical per-instrument quote state and the merge rule.
//!
//! `QuoteRecord::merge` is the single place where a raw tick is folded into the
//! stored state of an instrument and where incremental volume is derived. Both
//! the publisher and the subscriber caches go through it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::truncate_to_second;
use crate::error::FeedError;
use crate::instruments::InstrumentKey;
use crate::result::Result;
use crate::tick::RawTick;

/// Price increment used to round the micro-price.
pub const TICK_SIZE: f64 = 0.05;

/// Merged state of one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    /// Cache key.
    pub key: InstrumentKey,
    /// Trading symbol, once seen.
    pub trading_symbol: Option<String>,
    /// Last traded price. Always positive.
    pub last_price: f64,
    /// Last seen cumulative volume; the baseline for the next increment.
    pub cumulative_volume: Option<u64>,
    /// Volume traded since the previous tick of this instrument.
    pub incremental_volume: u64,
    /// Open interest.
    pub open_interest: Option<f64>,
    /// Best bid price.
    pub bid_price: Option<f64>,
    /// Best bid quantity.
    pub bid_qty: Option<u64>,
    /// Best ask price.
    pub ask_price: Option<f64>,
    /// Best ask quantity.
    pub ask_qty: Option<u64>,
    /// Exchange time of the last tick (or receipt time without one), whole seconds.
    pub quote_timestamp: DateTime<Utc>,
    /// Local wall-clock time at which the last tick was merged.
    pub received_at: DateTime<Utc>,
}

impl QuoteRecord {
    /// Folds `tick` into `previous`.
    ///
    /// Fields present in the tick overwrite, absent fields keep their previous
    /// value. Incremental volume is the difference of cumulative volumes, or 0
    /// when there is no previous baseline, the tick carries no volume, or the
    /// volume went backwards. A tick with a non-positive price, or one that
    /// would leave the record without a price, is rejected with
    /// [`FeedError::InvalidPrice`].
    pub fn merge(
        previous: Option<&QuoteRecord>,
        tick: &RawTick,
        received_at: DateTime<Utc>,
    ) -> Result<QuoteRecord> {
        let key = tick.key();
        if let Some(price) = tick.last_price {
            if !(price > 0.0) {
                return Err(FeedError::InvalidPrice(key.to_string()));
            }
        }
        let last_price = tick
            .last_price
            .or(previous.map(|p| p.last_price))
            .ok_or_else(|| FeedError::InvalidPrice(key.to_string()))?;

        let incremental_volume = match (
            previous.and_then(|p| p.cumulative_volume),
            tick.cumulative_volume,
        ) {
            (Some(before), Some(now)) => now.saturating_sub(before),
            _ => 0,
        };

        Ok(QuoteRecord {
            key,
            trading_symbol: tick
                .trading_symbol
                .clone()
                .or_else(|| previous.and_then(|p| p.trading_symbol.clone())),
            last_price,
            cumulative_volume: tick
                .cumulative_volume
                .or_else(|| previous.and_then(|p| p.cumulative_volume)),
            incremental_volume,
            open_interest: tick.open_interest.or_else(|| previous.and_then(|p| p.open_interest)),
            bid_price: tick.bid_price.or_else(|| previous.and_then(|p| p.bid_price)),
            bid_qty: tick.bid_qty.or_else(|| previous.and_then(|p| p.bid_qty)),
            ask_price: tick.ask_price.or_else(|| previous.and_then(|p| p.ask_price)),
            ask_qty: tick.ask_qty.or_else(|| previous.and_then(|p| p.ask_qty)),
            quote_timestamp: truncate_to_second(tick.exchange_time.unwrap_or(received_at)),
            received_at,
        })
    }

    /// Full-state tick equivalent of this record, with every stored field present.
    ///
    /// Replicas fold records received over the wire back through [`Self::merge`]
    /// so that increments are derived against their own baseline.
    pub fn to_tick(&self) -> RawTick {
        RawTick {
            exchange: self.key.exchange.clone(),
            token: self.key.token.clone(),
            trading_symbol: self.trading_symbol.clone(),
            last_price: Some(self.last_price),
            cumulative_volume: self.cumulative_volume,
            open_interest: self.open_interest,
            bid_price: self.bid_price,
            bid_qty: self.bid_qty,
            ask_price: self.ask_price,
            ask_qty: self.ask_qty,
            exchange_time: Some(self.quote_timestamp),
        }
    }

    /// Size-weighted mid of the best levels, rounded up to [`TICK_SIZE`].
    ///
    /// Falls back to the last price when either side of the book is missing.
    pub fn micro_price(&self) -> f64 {
        match (self.bid_price, self.bid_qty, self.ask_price, self.ask_qty) {
            (Some(bid), Some(bid_qty), Some(ask), Some(ask_qty)) if bid_qty + ask_qty > 0 => {
                let weighted = (ask * bid_qty as f64 + bid * ask_qty as f64)
                    / (bid_qty + ask_qty) as f64;
                let steps = (1.0 / TICK_SIZE).round();
                (weighted * steps).ceil() / steps
            }
            _ => self.last_price,
        }
    }
}

/// Payload of the `quote-update` topic: the merged record and the tick that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteMessage {
    /// Publisher-side merged state.
    pub record: QuoteRecord,
    /// The raw tick as received from the broker.
    pub raw: RawTick,
}

impl QuoteMessage {
    /// Encode the message to JSON bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        Ok(json)
    }

    /// Decode a message from JSON bytes.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| FeedError::Decode(e.to_string()))
    }
}
