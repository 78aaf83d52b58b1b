//! `LiveQuoteFeed`: the subscriber facade.
//!
//! Connects to a publisher, owns the replicated cache and its receive worker,
//! and answers the caller's queries (bars, liveness, micro-price, option
//! search) from that cache. Queries run on the caller's thread and only read.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use crossbeam_channel::{Receiver, bounded};
use log::{info, warn};
use quote_common::net::FeedStream;
use quote_common::{
    Clock, FeedAddress, OptionResolver, OptionType, Result, SymbolOptionResolver, SystemClock,
    TokenMapping,
};
use serde_json::Value;

use crate::aggregator::QuoteAggregator;
use crate::bars::{Bar, BarBatch, BarSynthesizer};
use crate::liveness;
use crate::nearest::{self, NearestOption};
use crate::receiver::{FeedOptions, ReceiveWorker};

/// Builder for [`LiveQuoteFeed`].
pub struct LiveQuoteFeedBuilder {
    address: FeedAddress,
    mapping: TokenMapping,
    options: FeedOptions,
    resolver: Arc<dyn OptionResolver>,
    clock: Arc<dyn Clock>,
}

impl LiveQuoteFeedBuilder {
    /// Receive-loop options.
    pub fn options(mut self, options: FeedOptions) -> Self {
        self.options = options;
        self
    }

    /// Option-contract resolver used by [`LiveQuoteFeed::nearest_premium`].
    pub fn resolver(mut self, resolver: Arc<dyn OptionResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Clock for receive stamps, bar times and liveness.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Connects and starts the receive worker.
    pub fn connect(self) -> Result<LiveQuoteFeed> {
        info!("Connecting to quote feed at {}", self.address);
        let stream = FeedStream::connect(&self.address)?;

        let aggregator = Arc::new(QuoteAggregator::new(Arc::clone(&self.clock)));
        let (orders_tx, orders_rx) = match self.options.order_buffer {
            Some(capacity) => {
                let (tx, rx) = bounded(capacity);
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };
        let worker = ReceiveWorker::spawn(
            stream,
            self.address.clone(),
            Arc::clone(&aggregator),
            orders_tx,
            self.options,
        )?;

        Ok(LiveQuoteFeed {
            address: self.address,
            mapping: self.mapping,
            aggregator,
            synthesizer: BarSynthesizer::new(),
            resolver: self.resolver,
            clock: self.clock,
            orders: orders_rx,
            worker: Mutex::new(worker),
        })
    }
}

/// Live quote feed consumed from a publisher.
pub struct LiveQuoteFeed {
    address: FeedAddress,
    mapping: TokenMapping,
    aggregator: Arc<QuoteAggregator>,
    synthesizer: BarSynthesizer,
    resolver: Arc<dyn OptionResolver>,
    clock: Arc<dyn Clock>,
    orders: Option<Receiver<Value>>,
    worker: Mutex<ReceiveWorker>,
}

impl LiveQuoteFeed {
    /// Builder for a feed reading `address`; `mapping` names the instruments.
    pub fn builder(address: FeedAddress, mapping: TokenMapping) -> LiveQuoteFeedBuilder {
        LiveQuoteFeedBuilder {
            address,
            mapping,
            options: FeedOptions::default(),
            resolver: Arc::new(SymbolOptionResolver),
            clock: Arc::new(SystemClock),
        }
    }

    /// Connects with default options.
    pub fn connect(address: FeedAddress, mapping: TokenMapping) -> Result<Self> {
        Self::builder(address, mapping).connect()
    }

    /// Publisher address.
    pub fn address(&self) -> &FeedAddress {
        &self.address
    }

    /// Next batch of bars, or `None` when no new upstream quote time was seen.
    pub fn next_bars(&self) -> Option<BarBatch> {
        self.synthesizer
            .next_bars(&self.aggregator, &self.mapping, self.clock.as_ref())
    }

    /// Tick bar for one instrument, stamped with its quote time.
    pub fn last_bar(&self, instrument: &str) -> Option<Bar> {
        let key = self.mapping.key_for(instrument)?;
        let cached = self.aggregator.get(key)?;
        let open_interest = cached
            .raw
            .open_interest
            .or_else(|| self.aggregator.latest_open_interest(key))
            .unwrap_or(0.0);
        let timestamp = cached.record.quote_timestamp;
        Some(Bar::from_quote(instrument, &cached, timestamp, open_interest))
    }

    /// Size-weighted mid for one instrument; see [`quote_common::QuoteRecord::micro_price`].
    pub fn micro_price(&self, instrument: &str) -> Option<f64> {
        let key = self.mapping.key_for(instrument)?;
        self.aggregator
            .get(key)
            .map(|cached| cached.record.micro_price())
    }

    /// `true` when a quote arrived no more than `threshold` ago.
    pub fn is_alive(&self, threshold: Duration) -> bool {
        liveness::is_alive(&self.aggregator.times(), self.clock.now(), threshold)
    }

    /// Option closest to `premium` among cached contracts of the given expiry and type.
    pub fn nearest_premium(
        &self,
        expiry: NaiveDate,
        option_type: OptionType,
        premium: f64,
    ) -> Option<NearestOption> {
        nearest::nearest_premium(
            &self.aggregator,
            &self.mapping,
            self.resolver.as_ref(),
            expiry,
            option_type,
            premium,
        )
    }

    /// Resolved timestamp of the last merged quote.
    pub fn last_quote_time(&self) -> Option<DateTime<Utc>> {
        self.aggregator.times().last_quote
    }

    /// Local time at which the last quote was merged.
    pub fn last_received_time(&self) -> Option<DateTime<Utc>> {
        self.aggregator.times().last_received
    }

    /// Wall-clock time of the last produced bar batch.
    pub fn next_bars_time(&self) -> Option<DateTime<Utc>> {
        self.synthesizer.next_bars_time()
    }

    /// Order updates, when forwarding was enabled with `order_buffer`.
    pub fn order_updates(&self) -> Option<&Receiver<Value>> {
        self.orders.as_ref()
    }

    /// The replicated cache.
    pub fn aggregator(&self) -> &QuoteAggregator {
        &self.aggregator
    }

    /// `true` once the feed has ended, either by [`Self::stop`] or because the
    /// publisher went away with reconnects disabled.
    pub fn is_stopped(&self) -> bool {
        match self.worker.lock() {
            Ok(worker) => worker.is_finished(),
            Err(_) => true,
        }
    }

    /// Stops the receive worker and waits for it.
    ///
    /// No cache mutation happens after this returns, even if the socket still
    /// holds unread frames.
    pub fn stop(&self) {
        match self.worker.lock() {
            Ok(mut worker) => worker.stop(),
            Err(e) => {
                warn!("Receive worker handle poisoned: {}", e);
                e.into_inner().stop();
            }
        }
    }
}

impl Drop for LiveQuoteFeed {
    fn drop(&mut self) {
        self.stop();
    }
}
