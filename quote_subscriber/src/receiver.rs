//! Receive worker: the single writer of the subscriber's cache.
//!
//! One background thread reads frames from the publisher, merges
//! `quote-update` payloads into the [`QuoteAggregator`] and forwards
//! `order-update` events to an optional bounded channel. Reads time out after
//! the idle wait so the stop flag is observed at least that often. When the
//! publisher goes away the worker reconnects until it is stopped.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use log::{debug, error, info, warn};
use quote_common::net::FeedStream;
use quote_common::wire::FrameDecoder;
use quote_common::{Envelope, FeedAddress, FeedError, Result, Topic};
use serde_json::Value;

use crate::aggregator::QuoteAggregator;

const READ_BUFFER_LEN: usize = 64 * 1024;

/// Receive-loop tuning.
#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Longest a read blocks before the stop flag is checked again.
    pub idle_wait: Duration,
    /// Capacity of the order-update channel; `None` discards order updates.
    pub order_buffer: Option<usize>,
    /// Pause between reconnect attempts; `None` ends the worker on disconnect.
    pub reconnect_interval: Option<Duration>,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            idle_wait: Duration::from_millis(10),
            order_buffer: None,
            reconnect_interval: Some(Duration::from_millis(500)),
        }
    }
}

struct WorkerContext {
    address: FeedAddress,
    aggregator: Arc<QuoteAggregator>,
    orders: Option<Sender<Value>>,
    options: FeedOptions,
    stop: Arc<AtomicBool>,
    current: Arc<Mutex<Option<FeedStream>>>,
}

/// Handle to the background receive thread.
pub struct ReceiveWorker {
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    current: Arc<Mutex<Option<FeedStream>>>,
    handle: Option<JoinHandle<()>>,
}

impl ReceiveWorker {
    /// Starts receiving on an already connected `stream`.
    pub fn spawn(
        stream: FeedStream,
        address: FeedAddress,
        aggregator: Arc<QuoteAggregator>,
        orders: Option<Sender<Value>>,
        options: FeedOptions,
    ) -> Result<Self> {
        stream.set_read_timeout(Some(options.idle_wait))?;
        let stop = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let current = Arc::new(Mutex::new(Some(stream.try_clone()?)));

        let context = WorkerContext {
            address,
            aggregator,
            orders,
            options,
            stop: Arc::clone(&stop),
            current: Arc::clone(&current),
        };
        let done = Arc::clone(&finished);
        let handle = thread::Builder::new()
            .name("quote-receiver".to_string())
            .spawn(move || {
                info!("Quote receiver running on: {}", context.address);
                context.run(stream);
                done.store(true, Ordering::SeqCst);
                info!("Receiver loop stopping...");
            })?;

        Ok(Self {
            stop,
            finished,
            current,
            handle: Some(handle),
        })
    }

    /// `true` once the loop has exited, whether stopped or out of reconnects.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Signals the loop, shuts the socket down and waits for the thread.
    ///
    /// Once this returns the aggregator is never written again. Safe to call
    /// more than once.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        match self.current.lock() {
            Ok(mut current) => {
                if let Some(stream) = current.take() {
                    if let Err(e) = stream.shutdown() {
                        debug!("Feed socket shutdown: {}", e);
                    }
                }
            }
            Err(e) => warn!("Feed socket handle poisoned: {}", e),
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Quote receiver thread panicked");
            }
        }
    }
}

impl Drop for ReceiveWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl WorkerContext {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn run(&self, mut stream: FeedStream) {
        loop {
            if let Err(e) = self.receive(&mut stream) {
                warn!("Feed connection lost: {}", e);
            }
            if self.stopped() {
                return;
            }
            match self.reconnect() {
                Some(next) => stream = next,
                None => return,
            }
        }
    }

    /// Reads one connection until EOF, a transport error or the stop flag.
    fn receive(&self, stream: &mut FeedStream) -> Result<()> {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; READ_BUFFER_LEN];

        while !self.stopped() {
            match stream.read(&mut buf) {
                Ok(0) => {
                    info!("Publisher closed the feed");
                    return Ok(());
                }
                Ok(n) => {
                    decoder.extend(&buf[..n]);
                    self.drain(&mut decoder)?;
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) if self.stopped() => {
                    debug!("Read interrupted by stop: {}", e);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Dispatches every complete envelope in `decoder`.
    ///
    /// An oversized frame means the stream lost sync and is returned so the
    /// connection gets reset; undecodable bodies are dropped.
    fn drain(&self, decoder: &mut FrameDecoder) -> Result<()> {
        loop {
            if self.stopped() {
                return Ok(());
            }
            match decoder.next_envelope() {
                Ok(Some(envelope)) => self.dispatch(envelope),
                Ok(None) => return Ok(()),
                Err(e @ FeedError::FrameTooLarge(_)) => return Err(e),
                Err(e) => warn!("Dropping undecodable frame: {}", e),
            }
        }
    }

    fn dispatch(&self, envelope: Envelope) {
        match envelope.topic {
            Topic::QuoteUpdate => match self.aggregator.apply_payload(&envelope.payload) {
                Ok(()) => {}
                Err(FeedError::InvalidPrice(key)) => {
                    debug!("Dropped tick for {} without a positive price", key)
                }
                Err(e) => warn!("Dropping {} message: {}", Topic::QuoteUpdate, e),
            },
            Topic::OrderUpdate => {
                let Some(orders) = &self.orders else {
                    return;
                };
                let event = match serde_json::from_slice::<Value>(&envelope.payload) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Dropping {} message: {}", Topic::OrderUpdate, e);
                        return;
                    }
                };
                match orders.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("Order update channel full, dropping event")
                    }
                    Err(TrySendError::Disconnected(_)) => debug!("Order update receiver dropped"),
                }
            }
        }
    }

    /// Waits out the reconnect interval and dials again until connected or stopped.
    fn reconnect(&self) -> Option<FeedStream> {
        let interval = self.options.reconnect_interval?;
        if let Ok(mut current) = self.current.lock() {
            current.take();
        }
        while !self.stopped() {
            thread::sleep(interval);
            if self.stopped() {
                break;
            }
            match self.connect() {
                Ok(stream) => {
                    info!("Reconnected to {}", self.address);
                    return Some(stream);
                }
                Err(e) => debug!("Reconnect to {} failed: {}", self.address, e),
            }
        }
        None
    }

    fn connect(&self) -> Result<FeedStream> {
        let stream = FeedStream::connect(&self.address)?;
        stream.set_read_timeout(Some(self.options.idle_wait))?;
        *self.current.lock()? = Some(stream.try_clone()?);
        Ok(stream)
    }
}
