//! Publisher side of the transport.
//!
//! The `Broadcaster` binds the session's feed address and accepts subscriber
//! connections on a background thread. Each subscriber gets its own writer
//! thread fed by a bounded channel, so a slow subscriber never stalls
//! publishing: once its queue is full, new frames for it are dropped. A
//! subscriber whose socket fails is dropped on the next publish.
//!
//! Delivery is best-effort: frames go to whoever is connected at publish time,
//! there is no backlog for late joiners, and every subscriber sees frames in
//! publish order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select, unbounded};
use log::{debug, error, info, warn};
use quote_common::net::{FeedListener, FeedStream};
use quote_common::{Envelope, FeedAddress, FeedError, Result, Topic};
use std::io::Write;

/// Writes to a subscriber that take longer than this drop the subscriber.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames queued per subscriber before new ones are dropped.
pub const SUBSCRIBER_QUEUE_LEN: usize = 10_000;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

type Frame = Arc<Vec<u8>>;

/// Fan-out of framed envelopes to every connected subscriber.
pub struct Broadcaster {
    address: FeedAddress,
    subscribers: Arc<Mutex<Vec<Sender<Frame>>>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    running: Arc<AtomicBool>,
    stop_tx: Mutex<Option<Sender<()>>>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Stream task for a single subscriber.
///
/// Forwards frames from `frames_rx` to `stream` until `stop_rx` disconnects,
/// the frame channel closes, or a write fails.
fn handle_subscriber_stream(
    mut stream: FeedStream,
    frames_rx: Receiver<Frame>,
    stop_rx: Receiver<()>,
) -> Result<()> {
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(frames_rx) -> msg => match msg {
                Ok(frame) => stream.write_all(&frame)?,
                Err(_) => break,
            }
        }
    }
    stream.shutdown()
}

impl Broadcaster {
    /// Binds `address` and starts accepting subscribers.
    ///
    /// The bound address (with the OS-assigned port for `tcp://…:0`) is logged
    /// and available through [`Self::address`].
    pub fn bind(address: &FeedAddress) -> Result<Self> {
        Self::bind_with_queue(address, SUBSCRIBER_QUEUE_LEN)
    }

    /// Like [`Self::bind`], holding at most `queue_len` frames per subscriber.
    pub fn bind_with_queue(address: &FeedAddress, queue_len: usize) -> Result<Self> {
        let listener = FeedListener::bind(address)?;
        let address = listener.local_address()?;
        info!("Quote feed publishing on: {}", address);

        let subscribers: Arc<Mutex<Vec<Sender<Frame>>>> = Arc::new(Mutex::new(Vec::new()));
        let workers: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = unbounded::<()>();

        let accept_handle = {
            let subscribers = Arc::clone(&subscribers);
            let workers = Arc::clone(&workers);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("feed-accept".to_string())
                .spawn(move || {
                    accept_loop(listener, subscribers, workers, running, stop_rx, queue_len)
                })?
        };

        Ok(Self {
            address,
            subscribers,
            workers,
            running,
            stop_tx: Mutex::new(Some(stop_tx)),
            accept_handle: Mutex::new(Some(accept_handle)),
        })
    }

    /// Address subscribers connect to.
    pub fn address(&self) -> &FeedAddress {
        &self.address
    }

    /// Sends `payload` on `topic` to every connected subscriber.
    ///
    /// Returns the number of subscribers the frame was queued for. A
    /// subscriber with a full queue misses this frame but stays connected.
    pub fn publish(&self, topic: Topic, payload: Vec<u8>) -> Result<usize> {
        let frame: Frame = Arc::new(Envelope::new(topic, payload).to_frame()?);
        let mut queued = 0;
        let mut subscribers = self.subscribers.lock()?;
        subscribers.retain(|tx| match tx.try_send(Arc::clone(&frame)) {
            Ok(()) => {
                queued += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!("Subscriber queue full, dropping {} frame", topic);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        Ok(queued)
    }

    /// Number of currently connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Stops accepting, disconnects every subscriber and joins the threads.
    pub fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop_tx.lock()?.take();
        self.subscribers.lock()?.clear();

        // Unblock the accept call.
        if let Err(e) = FeedStream::connect(&self.address) {
            debug!("Wake-up connection to {} failed: {}", self.address, e);
        }
        if let Some(handle) = self.accept_handle.lock()?.take() {
            if handle.join().is_err() {
                error!("Feed accept thread panicked");
            }
        }
        let workers: Vec<JoinHandle<()>> = self.workers.lock()?.drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                error!("Subscriber stream thread panicked");
            }
        }
        info!("Quote feed on {} shut down", self.address);
        Ok(())
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Failed to shut down broadcaster: {}", e);
        }
    }
}

fn accept_loop(
    listener: FeedListener,
    subscribers: Arc<Mutex<Vec<Sender<Frame>>>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    running: Arc<AtomicBool>,
    stop_rx: Receiver<()>,
    queue_len: usize,
) {
    while running.load(Ordering::SeqCst) {
        let stream = match listener.accept() {
            Ok(stream) => stream,
            Err(e) => {
                back_off_after_accept_error(&running, &e);
                continue;
            }
        };
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let (frames_tx, frames_rx) = bounded::<Frame>(queue_len);
        let stop_rx = stop_rx.clone();
        let spawned = thread::Builder::new()
            .name("feed-subscriber".to_string())
            .spawn(move || {
                if let Err(e) = handle_subscriber_stream(stream, frames_rx, stop_rx) {
                    warn!("Subscriber stream closed: {}", e);
                }
            });

        match spawned {
            Ok(handle) => {
                if let Err(e) = register(&subscribers, &workers, frames_tx, handle) {
                    error!("Failed to register subscriber: {}", e);
                    continue;
                }
                info!("A stream has been created for a new subscriber");
            }
            Err(e) => error!("Failed to spawn subscriber stream: {}", e),
        }
    }
    debug!("Feed accept loop stopping...");
}

/// Logs a failed `accept` and pauses, so a persistent error (e.g. out of file
/// descriptors) does not spin. Returns at once when shutting down.
fn back_off_after_accept_error(running: &AtomicBool, error: &FeedError) {
    if running.load(Ordering::SeqCst) {
        error!("Subscriber connection error: {}", error);
        thread::sleep(ACCEPT_BACKOFF);
    }
}

fn register(
    subscribers: &Mutex<Vec<Sender<Frame>>>,
    workers: &Mutex<Vec<JoinHandle<()>>>,
    frames_tx: Sender<Frame>,
    handle: JoinHandle<()>,
) -> Result<(), FeedError> {
    subscribers.lock()?.push(frames_tx);
    let mut workers = workers.lock()?;
    workers.retain(|w| !w.is_finished());
    workers.push(handle);
    Ok(())
}
