//! Publisher to subscriber over loopback TCP, driven by a scripted broker session.

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use quote_common::instruments::parse_token_mappings;
use quote_common::{
    FeedAddress, InstrumentKey, ManualClock, OptionType, RawTick, Result, TokenMapping,
};
use quote_publisher::{BrokerSession, PublisherConfig, QuoteFeedPublisher, SessionEvents};
use quote_subscriber::{FeedOptions, LiveQuoteFeed};
use serde_json::json;

const MAPPINGS: &str = "\
# instrument,exchange|token
NSE|NIFTY INDEX,NSE|26000
NFO|NIFTY28DEC23C21000,NFO|43651
NFO|NIFTY28DEC23C21100,NFO|43653
NFO|NIFTY28DEC23P21000,NFO|43652
";

/// Broker session whose callbacks the test fires by hand.
#[derive(Default)]
struct ScriptedSession {
    events: Mutex<Option<Arc<dyn SessionEvents>>>,
    subscribed: Mutex<Vec<InstrumentKey>>,
}

impl ScriptedSession {
    fn events(&self) -> Arc<dyn SessionEvents> {
        self.events.lock().unwrap().clone().expect("session not started")
    }
}

impl BrokerSession for ScriptedSession {
    fn start(&self, events: Arc<dyn SessionEvents>) -> Result<()> {
        *self.events.lock()? = Some(events);
        Ok(())
    }

    fn subscribe(&self, key: &InstrumentKey) -> Result<()> {
        self.subscribed.lock()?.push(key.clone());
        Ok(())
    }

    fn subscribe_orders(&self) -> Result<()> {
        Ok(())
    }
}

struct Setup {
    session: Arc<ScriptedSession>,
    publisher: Arc<QuoteFeedPublisher>,
    feed: LiveQuoteFeed,
    clock: ManualClock,
}

fn start() -> DateTime<Utc> {
    Utc.timestamp_opt(1_703_145_600, 0).unwrap()
}

fn mapping() -> TokenMapping {
    TokenMapping::from_all(&parse_token_mappings(Cursor::new(MAPPINGS)).unwrap()).unwrap()
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn setup(options: FeedOptions) -> Setup {
    let session = Arc::new(ScriptedSession::default());
    let publisher = QuoteFeedPublisher::builder(session.clone(), mapping())
        .config(PublisherConfig {
            address: FeedAddress::loopback(),
            ..PublisherConfig::default()
        })
        .build()
        .unwrap();
    publisher.start().unwrap();
    session.events().on_opened();

    let clock = ManualClock::new(start());
    let feed = LiveQuoteFeed::builder(publisher.address().clone(), mapping())
        .options(options)
        .clock(Arc::new(clock.clone()))
        .connect()
        .unwrap();
    assert!(wait_until(|| publisher.subscriber_count() == 1));

    Setup {
        session,
        publisher,
        feed,
        clock,
    }
}

fn option_tick(token: &str, price: f64, second: i64) -> RawTick {
    RawTick::new("NFO", token)
        .with_last_price(price)
        .with_exchange_time(start() + chrono::Duration::seconds(second))
}

#[test]
fn ticks_flow_through_to_bars() {
    let s = setup(FeedOptions::default());
    let events = s.session.events();
    let key = InstrumentKey::new("NFO", "43651");
    let cumulative = [1_000u64, 1_250, 1_250, 1_900];

    let mut volumes = Vec::new();
    for (i, volume) in cumulative.iter().enumerate() {
        let tick = option_tick("43651", 98.0 + i as f64, i as i64).with_volume(*volume);
        let tick = if i == 0 { tick.with_open_interest(120.0) } else { tick };
        events.on_quote_update(tick);
        assert!(wait_until(|| {
            s.feed
                .aggregator()
                .get(&key)
                .is_some_and(|cached| cached.record.cumulative_volume == Some(*volume))
        }));
        s.clock.advance(chrono::Duration::seconds(1));

        let batch = s.feed.next_bars().expect("quote time moved");
        let bar = batch.get("NFO|NIFTY28DEC23C21000").unwrap();
        assert_eq!(bar.close, 98.0 + i as f64);
        assert_eq!(bar.open_interest, 120.0);
        volumes.push(bar.volume);
        assert!(s.feed.next_bars().is_none());
    }
    assert_eq!(volumes, vec![0, 250, 0, 650]);

    let last = s.feed.last_bar("NFO|NIFTY28DEC23C21000").unwrap();
    assert_eq!(last.timestamp, start() + chrono::Duration::seconds(3));
    assert_eq!(s.feed.last_quote_time(), Some(start() + chrono::Duration::seconds(3)));
    assert_eq!(s.feed.micro_price("NFO|NIFTY28DEC23C21000"), Some(101.0));
    assert_eq!(s.publisher.quote("NFO|NIFTY28DEC23C21000").unwrap().last_price, 101.0);

    // Non-positive price never reaches the subscriber's bars.
    events.on_quote_update(option_tick("43651", 0.0, 4));
    thread::sleep(Duration::from_millis(50));
    assert!(s.feed.next_bars().is_none());

    s.feed.stop();
    s.publisher.stop();
}

#[test]
fn liveness_follows_the_clock() {
    let s = setup(FeedOptions::default());
    let heartbeat = Duration::from_secs(5);
    assert!(!s.feed.is_alive(heartbeat));

    s.clock.set(start());
    s.session
        .events()
        .on_quote_update(option_tick("43651", 98.0, 0));
    assert!(wait_until(|| s.feed.last_quote_time().is_some()));
    assert!(s.feed.is_alive(heartbeat));

    s.clock.advance(chrono::Duration::seconds(6));
    assert!(!s.feed.is_alive(heartbeat));
    s.publisher.stop();
}

#[test]
fn nearest_premium_over_live_quotes() {
    let s = setup(FeedOptions::default());
    let events = s.session.events();
    events.on_quote_update(option_tick("43651", 98.0, 0));
    events.on_quote_update(option_tick("43653", 105.0, 0));
    events.on_quote_update(option_tick("43652", 100.0, 0));
    events.on_quote_update(RawTick::new("NSE", "26000").with_last_price(21500.0));
    assert!(wait_until(|| s.feed.aggregator().len() == 4));

    let expiry = NaiveDate::from_ymd_opt(2023, 12, 28).unwrap();
    let call = s.feed.nearest_premium(expiry, OptionType::Call, 100.0).unwrap();
    assert_eq!(call.instrument, "NFO|NIFTY28DEC23C21000");
    assert_eq!(call.price, 98.0);
    let put = s.feed.nearest_premium(expiry, OptionType::Put, 100.0).unwrap();
    assert_eq!(put.instrument, "NFO|NIFTY28DEC23P21000");
    assert!(
        s.feed
            .nearest_premium(NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(), OptionType::Call, 100.0)
            .is_none()
    );
    s.publisher.stop();
}

#[test]
fn order_updates_are_forwarded() {
    let s = setup(FeedOptions {
        order_buffer: Some(8),
        ..FeedOptions::default()
    });
    s.session
        .events()
        .on_order_update(&json!({"norenordno": "42", "status": "COMPLETE"}));

    let orders = s.feed.order_updates().unwrap();
    let event = orders.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(event["norenordno"], "42");
    assert_eq!(event["status"], "COMPLETE");
    s.publisher.stop();
}

#[test]
fn no_mutation_after_stop() {
    let s = setup(FeedOptions::default());
    let events = s.session.events();
    let key = InstrumentKey::new("NFO", "43651");
    events.on_quote_update(option_tick("43651", 98.0, 0));
    assert!(wait_until(|| s.feed.aggregator().len() == 1));

    s.feed.stop();
    assert!(s.feed.is_stopped());
    let before = s.feed.aggregator().get(&key).unwrap();

    events.on_quote_update(option_tick("43651", 99.0, 1));
    events.on_quote_update(option_tick("43653", 105.0, 1));
    thread::sleep(Duration::from_millis(100));

    assert_eq!(s.feed.aggregator().get(&key).unwrap(), before);
    assert_eq!(s.feed.aggregator().len(), 1);
    assert_eq!(s.feed.last_quote_time(), Some(start()));
    s.publisher.stop();
}

#[test]
fn publisher_shutdown_ends_feed_without_reconnect() {
    let s = setup(FeedOptions {
        reconnect_interval: None,
        ..FeedOptions::default()
    });
    assert!(!s.feed.is_stopped());
    s.publisher.stop();
    assert!(wait_until(|| s.feed.is_stopped()));
}
