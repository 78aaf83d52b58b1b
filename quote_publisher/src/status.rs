//! Periodic feed status line.
//!
//! Logs the last-quote and last-received timestamps on a fixed interval so an
//! operator can see the feed is moving. Read-only; a poisoned lock just skips a
//! line.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use log::{error, info, warn};
use quote_common::{FeedTimes, Result};

/// Default interval between status lines.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Background status logger; stopped on [`StatusLogger::stop`] or drop.
pub struct StatusLogger {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StatusLogger {
    /// Spawns the logger thread.
    pub fn start(times: Arc<Mutex<FeedTimes>>, interval: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("feed-status".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => match times.lock() {
                            Ok(times) => info!("{}", *times),
                            Err(e) => warn!("Skipping status line: {}", e),
                        },
                        _ => break,
                    }
                }
            })?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for it.
    pub fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Status logger thread panicked");
            }
        }
    }
}

impl Drop for StatusLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn stop_returns_promptly() {
        let times = Arc::new(Mutex::new(FeedTimes::default()));
        let mut logger = StatusLogger::start(times, Duration::from_millis(10)).unwrap();
        thread::sleep(Duration::from_millis(35));
        let started = Instant::now();
        logger.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
        logger.stop();
    }
}
