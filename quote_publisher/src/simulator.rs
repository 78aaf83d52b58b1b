//! Simulated broker session.
//!
//! Stands in for a real broker SDK: once started it "connects", and after the
//! publisher subscribes it streams random-walk touchline ticks for every
//! subscribed instrument from a background thread, the way a live session
//! drives its callbacks. Used by the binary for local runs and demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use log::info;
use quote_common::{InstrumentKey, RawTick, Result};
use rand::Rng;
use serde_json::json;

use crate::session::{BrokerSession, SessionEvents};

/// Starting price of every simulated instrument.
const INITIAL_PRICE: f64 = 100.0;

/// Random-walk tick generator behaving like a broker session.
pub struct SimulatedSession {
    interval: Duration,
    subscriptions: Arc<Mutex<Vec<InstrumentKey>>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedSession {
    /// A session emitting one tick per subscribed instrument every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Calculate the next synthetic price using a small random walk around `current_price`.
    ///
    /// The change is sampled uniformly from `[-1%, +1%]` and the result is kept
    /// on the 0.05 price grid with a floor of one tick.
    pub fn next_price(current_price: f64) -> f64 {
        let mut rng = rand::rng();
        let change: f64 = rng.random_range(-0.01..0.01);
        let new_price = (current_price * (1.0 + change) * 20.0).round() / 20.0;
        new_price.max(0.05)
    }
}

/// State of one simulated instrument.
struct SimulatedBook {
    price: f64,
    volume: u64,
    open_interest: u64,
}

fn generate_tick(key: &InstrumentKey, book: &mut SimulatedBook) -> RawTick {
    let mut rng = rand::rng();
    book.price = SimulatedSession::next_price(book.price);
    book.volume += rng.random_range(0..500);
    if rng.random_bool(0.3) {
        book.open_interest += rng.random_range(0..50);
    }

    let mut tick = RawTick::new(key.exchange.as_str(), key.token.as_str())
        .with_last_price(book.price)
        .with_volume(book.volume)
        .with_bid(book.price - 0.05, rng.random_range(1..200))
        .with_ask(book.price + 0.05, rng.random_range(1..200))
        .with_exchange_time(Utc::now());
    if rng.random_bool(0.5) {
        tick = tick.with_open_interest(book.open_interest as f64);
    }
    tick
}

impl BrokerSession for SimulatedSession {
    fn start(&self, events: Arc<dyn SessionEvents>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let interval = self.interval;
        let subscriptions = Arc::clone(&self.subscriptions);
        let running = Arc::clone(&self.running);

        let handle = thread::Builder::new()
            .name("simulated-session".to_string())
            .spawn(move || {
                info!("Simulated session started (Thread ID: {:?})", thread::current().id());
                events.on_opened();

                let mut books: HashMap<InstrumentKey, SimulatedBook> = HashMap::new();
                let mut order_id: u64 = 0;
                while running.load(Ordering::SeqCst) {
                    let keys = match subscriptions.lock() {
                        Ok(keys) => keys.clone(),
                        Err(e) => {
                            events.on_error(&e.to_string());
                            break;
                        }
                    };
                    for key in &keys {
                        let book = books.entry(key.clone()).or_insert(SimulatedBook {
                            price: INITIAL_PRICE,
                            volume: 0,
                            open_interest: 1_000,
                        });
                        events.on_quote_update(generate_tick(key, book));
                    }
                    if rand::rng().random_bool(0.01) {
                        order_id += 1;
                        events.on_order_update(&json!({
                            "t": "om",
                            "norenordno": order_id.to_string(),
                            "status": "COMPLETE",
                        }));
                    }
                    thread::sleep(interval);
                }
                events.on_closed();
            })?;
        *self.handle.lock()? = Some(handle);
        Ok(())
    }

    fn subscribe(&self, key: &InstrumentKey) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock()?;
        if !subscriptions.contains(key) {
            subscriptions.push(key.clone());
        }
        Ok(())
    }

    fn subscribe_orders(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock()?.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        Ok(())
    }
}
