//! Ingestion-side quote feed.
//!
//! `QuoteFeedPublisher` receives callbacks from the broker session, folds every
//! tick into its own quote cache, broadcasts the merged record on
//! `quote-update`, and mirrors it to the durable sink. Order events are passed
//! through on `order-update` untouched.
//!
//! Lifecycle:
//! - `start` registers the publisher with the session and starts the status logger.
//! - `on_opened` subscribes every mapped instrument (plus orders), marks them
//!   pending and fires the one-shot ready condition.
//! - `wait_initialized` waits for that condition, then for a first quote from
//!   every pending instrument.
//! - `stop` closes the session and tears the transport down.
//!
//! Every callback isolates its own failures: they are logged and the callback
//! returns normally, so the session keeps streaming.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use quote_common::{
    Clock, FeedAddress, FeedError, FeedTimes, InstrumentKey, QuoteMessage, QuoteRecord, RawTick,
    Result, SystemClock, TokenMapping, Topic,
};
use serde_json::Value;

use crate::broadcaster::Broadcaster;
use crate::session::{BrokerSession, SessionEvents};
use crate::sink::{NoopSink, QuoteSink, SinkWorker};
use crate::status::{STATUS_INTERVAL, StatusLogger};

/// Granularity of the subscription check in [`QuoteFeedPublisher::wait_initialized`].
const SUBSCRIPTION_POLL: Duration = Duration::from_secs(1);

/// Publisher settings.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Address subscribers connect to.
    pub address: FeedAddress,
    /// Interval between status log lines.
    pub status_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            address: FeedAddress::platform_default(),
            status_interval: STATUS_INTERVAL,
        }
    }
}

/// Builder for [`QuoteFeedPublisher`].
pub struct PublisherBuilder {
    session: Arc<dyn BrokerSession>,
    mapping: TokenMapping,
    config: PublisherConfig,
    sink: Box<dyn QuoteSink>,
    clock: Arc<dyn Clock>,
}

impl PublisherBuilder {
    /// Overrides the settings.
    pub fn config(mut self, config: PublisherConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the durable sink. Defaults to [`NoopSink`].
    pub fn sink(mut self, sink: Box<dyn QuoteSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the wall clock. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Binds the transport and starts the sink worker.
    pub fn build(self) -> Result<Arc<QuoteFeedPublisher>> {
        let broadcaster = Broadcaster::bind(&self.config.address)?;
        let sink = SinkWorker::start(self.sink)?;
        Ok(Arc::new(QuoteFeedPublisher {
            session: self.session,
            mapping: self.mapping,
            clock: self.clock,
            status_interval: self.config.status_interval,
            quotes: Mutex::new(HashMap::new()),
            times: Arc::new(Mutex::new(FeedTimes::default())),
            pending: Mutex::new(HashSet::new()),
            seen: Mutex::new(HashSet::new()),
            connected: AtomicBool::new(false),
            opened: (Mutex::new(false), Condvar::new()),
            broadcaster,
            sink,
            status_logger: Mutex::new(None),
        }))
    }
}

/// Broker-facing publisher of the quote feed.
pub struct QuoteFeedPublisher {
    session: Arc<dyn BrokerSession>,
    mapping: TokenMapping,
    clock: Arc<dyn Clock>,
    status_interval: Duration,
    quotes: Mutex<HashMap<InstrumentKey, QuoteRecord>>,
    times: Arc<Mutex<FeedTimes>>,
    pending: Mutex<HashSet<InstrumentKey>>,
    /// Keys that produced any tick, priced or not.
    seen: Mutex<HashSet<InstrumentKey>>,
    connected: AtomicBool,
    opened: (Mutex<bool>, Condvar),
    broadcaster: Broadcaster,
    sink: SinkWorker,
    status_logger: Mutex<Option<StatusLogger>>,
}

impl QuoteFeedPublisher {
    /// Starts building a publisher for the instruments in `mapping`.
    pub fn builder(session: Arc<dyn BrokerSession>, mapping: TokenMapping) -> PublisherBuilder {
        PublisherBuilder {
            session,
            mapping,
            config: PublisherConfig::default(),
            sink: Box::new(NoopSink),
            clock: Arc::new(SystemClock),
        }
    }

    /// Registers with the broker session and starts the status logger.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut status_logger = self.status_logger.lock()?;
        if status_logger.is_none() {
            *status_logger = Some(StatusLogger::start(
                Arc::clone(&self.times),
                self.status_interval,
            )?);
        }
        drop(status_logger);

        let events: Arc<dyn SessionEvents> = Arc::clone(self) as Arc<dyn SessionEvents>;
        self.session.start(events)
    }

    /// Waits for the connection to open and every instrument to quote once.
    ///
    /// Fails with [`FeedError::ConnectionTimeout`] as soon as `timeout` passes
    /// without the open callback, or with [`FeedError::SubscriptionTimeout`]
    /// when some instruments are still silent at the deadline. The
    /// subscription check runs once per second.
    pub fn wait_initialized(&self, timeout: Duration) -> Result<()> {
        info!(
            "Waiting for the quote feed to initialize with timeout of {:?}",
            timeout
        );
        let deadline = Instant::now() + timeout;

        let (lock, ready) = &self.opened;
        let (opened, _) = ready.wait_timeout_while(lock.lock()?, timeout, |opened| !*opened)?;
        if !*opened {
            error!("Connection not opened in {:?}. Stopping the feed", timeout);
            return Err(FeedError::ConnectionTimeout(timeout.as_secs()));
        }
        drop(opened);
        info!("Connection opened. Waiting for subscriptions to complete");

        loop {
            let missing = self.missing_subscriptions()?;
            if missing.is_empty() {
                self.pending.lock()?.clear();
                info!("Initialization complete!");
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                let mut missing: Vec<String> = missing
                    .iter()
                    .map(|key| {
                        self.mapping
                            .instrument_for(key)
                            .map_or_else(|| key.to_string(), str::to_string)
                    })
                    .collect();
                missing.sort();
                error!("Subscriptions did not complete: {:?}", missing);
                return Err(FeedError::SubscriptionTimeout(missing));
            }
            thread::sleep(SUBSCRIPTION_POLL.min(deadline - now));
        }
    }

    fn missing_subscriptions(&self) -> Result<Vec<InstrumentKey>> {
        let pending = self.pending.lock()?;
        let seen = self.seen.lock()?;
        Ok(pending
            .iter()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect())
    }

    fn ingest(&self, tick: RawTick) -> Result<()> {
        let received_at = self.clock.now();
        let key = tick.key();
        self.seen.lock()?.insert(key.clone());
        let record = {
            let mut quotes = self.quotes.lock()?;
            let merged = QuoteRecord::merge(quotes.get(&key), &tick, received_at)?;
            quotes.insert(key, merged.clone());
            merged
        };
        self.times.lock()?.record(record.quote_timestamp, received_at);

        let message = QuoteMessage { record, raw: tick };
        self.broadcaster
            .publish(Topic::QuoteUpdate, message.to_json_bytes()?)?;
        self.sink.submit(message.record);
        Ok(())
    }

    fn forward_order(&self, event: &Value) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        self.broadcaster.publish(Topic::OrderUpdate, payload)?;
        Ok(())
    }

    fn open(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        let keys: Vec<InstrumentKey> = self.mapping.keys().cloned().collect();
        {
            let mut pending = self.pending.lock()?;
            pending.clear();
            pending.extend(keys.iter().cloned());
        }
        for key in &keys {
            info!(
                "Subscribing to channel {} ({})",
                key,
                self.mapping.instrument_for(key).unwrap_or("?")
            );
            if let Err(e) = self.session.subscribe(key) {
                error!("Failed to subscribe to {}: {}", key, e);
            }
        }
        if let Err(e) = self.session.subscribe_orders() {
            error!("Failed to subscribe to order updates: {}", e);
        }

        let (lock, ready) = &self.opened;
        *lock.lock()? = true;
        ready.notify_all();
        Ok(())
    }

    /// Address subscribers connect to.
    pub fn address(&self) -> &FeedAddress {
        self.broadcaster.address()
    }

    /// Number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    /// Whether the broker connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Merged quote for an instrument id, if one has arrived.
    pub fn quote(&self, instrument: &str) -> Option<QuoteRecord> {
        let key = self.mapping.key_for(instrument)?;
        self.quotes.lock().ok()?.get(key).cloned()
    }

    /// Resolved timestamp of the last merged quote.
    pub fn last_quote_time(&self) -> Option<DateTime<Utc>> {
        self.times.lock().ok()?.last_quote
    }

    /// Wall-clock time of the last merged quote.
    pub fn last_received_time(&self) -> Option<DateTime<Utc>> {
        self.times.lock().ok()?.last_received
    }

    /// Closes the session, stops background threads and the transport.
    pub fn stop(&self) {
        if let Ok(mut logger) = self.status_logger.lock() {
            if let Some(mut logger) = logger.take() {
                logger.stop();
            }
        }
        if self.is_connected() {
            if let Err(e) = self.session.close() {
                error!("Failed to close connection: {}", e);
            }
        }
        if let Err(e) = self.broadcaster.shutdown() {
            error!("Failed to shut down the feed transport: {}", e);
        }
        self.sink.shutdown();
    }
}

impl SessionEvents for QuoteFeedPublisher {
    fn on_quote_update(&self, tick: RawTick) {
        match self.ingest(tick) {
            Ok(()) => {}
            Err(FeedError::InvalidPrice(key)) => {
                debug!("Ignoring tick without a valid price for {}", key)
            }
            Err(e) => error!(
                "{}",
                FeedError::Callback {
                    callback: "on_quote_update",
                    reason: e.to_string(),
                }
            ),
        }
    }

    fn on_order_update(&self, event: &Value) {
        info!("Order update: {}", event);
        if let Err(e) = self.forward_order(event) {
            error!(
                "{}",
                FeedError::Callback {
                    callback: "on_order_update",
                    reason: e.to_string(),
                }
            );
        }
    }

    fn on_opened(&self) {
        info!("Websocket connected");
        if let Err(e) = self.open() {
            error!(
                "{}",
                FeedError::Callback {
                    callback: "on_opened",
                    reason: e.to_string(),
                }
            );
        }
    }

    fn on_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
        info!("Websocket disconnected");
    }

    fn on_error(&self, error: &str) {
        warn!("Error: {}.", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use quote_common::ManualClock;
    use quote_common::instruments::parse_token_mappings;
    use std::io::Cursor;

    #[derive(Default)]
    struct RecordingSession {
        subscribed: Mutex<Vec<InstrumentKey>>,
        orders: AtomicBool,
    }

    impl BrokerSession for RecordingSession {
        fn start(&self, _events: Arc<dyn SessionEvents>) -> Result<()> {
            Ok(())
        }

        fn subscribe(&self, key: &InstrumentKey) -> Result<()> {
            self.subscribed.lock()?.push(key.clone());
            Ok(())
        }

        fn subscribe_orders(&self) -> Result<()> {
            self.orders.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn mapping() -> TokenMapping {
        let mappings =
            parse_token_mappings(Cursor::new("NIFTY,NSE|26000\nBANKNIFTY,NSE|26009\n")).unwrap();
        TokenMapping::from_all(&mappings).unwrap()
    }

    fn publisher(session: Arc<RecordingSession>) -> Arc<QuoteFeedPublisher> {
        let clock = ManualClock::new(Utc.timestamp_opt(1_703_145_600, 0).unwrap());
        QuoteFeedPublisher::builder(session, mapping())
            .config(PublisherConfig {
                address: FeedAddress::loopback(),
                status_interval: Duration::from_secs(60),
            })
            .clock(Arc::new(clock))
            .build()
            .unwrap()
    }

    #[test]
    fn wait_initialized_times_out_without_open() {
        let publisher = publisher(Arc::new(RecordingSession::default()));
        let started = Instant::now();
        let err = publisher.wait_initialized(Duration::from_secs(2)).unwrap_err();
        let elapsed = started.elapsed();
        assert!(matches!(err, FeedError::ConnectionTimeout(2)));
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));
        publisher.stop();
    }

    #[test]
    fn open_subscribes_everything_and_waits_for_first_quotes() {
        let session = Arc::new(RecordingSession::default());
        let publisher = publisher(Arc::clone(&session));
        publisher.on_opened();
        assert!(publisher.is_connected());
        assert!(session.orders.load(Ordering::SeqCst));
        let mut subscribed = session.subscribed.lock().unwrap().clone();
        subscribed.sort();
        assert_eq!(
            subscribed,
            vec![InstrumentKey::new("NSE", "26000"), InstrumentKey::new("NSE", "26009")]
        );

        publisher.on_quote_update(RawTick::new("NSE", "26000").with_last_price(21500.0));
        publisher.on_quote_update(RawTick::new("NSE", "26009").with_last_price(47000.0));
        publisher.wait_initialized(Duration::from_secs(2)).unwrap();
        publisher.stop();
    }

    #[test]
    fn wait_initialized_reports_silent_instruments() {
        let publisher = publisher(Arc::new(RecordingSession::default()));
        publisher.on_opened();
        publisher.on_quote_update(RawTick::new("NSE", "26000").with_last_price(21500.0));
        match publisher.wait_initialized(Duration::from_secs(1)) {
            Err(FeedError::SubscriptionTimeout(missing)) => assert_eq!(missing, vec!["BANKNIFTY"]),
            other => panic!("unexpected result: {other:?}"),
        }
        publisher.stop();
    }

    #[test]
    fn unpriced_ticks_count_as_first_quotes() {
        let publisher = publisher(Arc::new(RecordingSession::default()));
        publisher.on_opened();
        publisher.on_quote_update(RawTick::new("NSE", "26000").with_bid(21499.0, 10));
        publisher.on_quote_update(RawTick::new("NSE", "26009").with_ask(47001.0, 5));

        publisher.wait_initialized(Duration::from_secs(1)).unwrap();
        assert!(publisher.quote("NIFTY").is_none());
        assert!(publisher.quote("BANKNIFTY").is_none());
        publisher.stop();
    }

    #[test]
    fn ticks_merge_into_cache_and_bad_prices_are_ignored() {
        let publisher = publisher(Arc::new(RecordingSession::default()));
        publisher.on_quote_update(
            RawTick::new("NSE", "26000")
                .with_last_price(21500.0)
                .with_volume(100)
                .with_open_interest(7.0),
        );
        publisher.on_quote_update(RawTick::new("NSE", "26000").with_volume(160));
        publisher.on_quote_update(
            RawTick::new("NSE", "26000")
                .with_last_price(0.0)
                .with_volume(999),
        );

        let quote = publisher.quote("NIFTY").unwrap();
        assert_eq!(quote.last_price, 21500.0);
        assert_eq!(quote.cumulative_volume, Some(160));
        assert_eq!(quote.incremental_volume, 60);
        assert_eq!(quote.open_interest, Some(7.0));
        assert!(publisher.quote("BANKNIFTY").is_none());
        assert_eq!(
            publisher.last_quote_time(),
            Some(Utc.timestamp_opt(1_703_145_600, 0).unwrap())
        );
        publisher.stop();
    }

    #[test]
    fn closed_clears_connected_flag_and_error_changes_nothing() {
        let publisher = publisher(Arc::new(RecordingSession::default()));
        publisher.on_opened();
        publisher.on_error("socket hiccup");
        assert!(publisher.is_connected());
        publisher.on_closed();
        assert!(!publisher.is_connected());
        publisher.stop();
    }
}
