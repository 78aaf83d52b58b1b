//! Durable quote sinks.
//!
//! A sink stores merged quote records somewhere durable. Ingestion must never
//! wait on it and never see its failures, so records are handed to a
//! [`SinkWorker`] thread through a channel; the worker calls the sink and logs
//! whatever goes wrong.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};
use log::{error, info};
use quote_common::{FeedError, QuoteRecord, Result};

/// Best-effort store for merged quote records.
pub trait QuoteSink: Send {
    /// Stores one record.
    fn store(&mut self, record: &QuoteRecord) -> Result<()>;

    /// Flushes buffered records.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl QuoteSink for NoopSink {
    fn store(&mut self, _record: &QuoteRecord) -> Result<()> {
        Ok(())
    }
}

/// Appends records to a JSON Lines file, one record per line.
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    /// Opens `path` in append mode, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("Quote sink writing to {}", path.display());
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }
}

impl QuoteSink for JsonLinesSink {
    fn store(&mut self, record: &QuoteRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)
            .map_err(|e| FeedError::Sink(format!("{}: {}", self.path.display(), e)))?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| FeedError::Sink(format!("{}: {}", self.path.display(), e)))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| FeedError::Sink(format!("{}: {}", self.path.display(), e)))
    }
}

/// Background thread feeding a [`QuoteSink`].
pub struct SinkWorker {
    tx: Mutex<Option<Sender<QuoteRecord>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SinkWorker {
    /// Spawns the worker thread that owns `sink`.
    pub fn start(mut sink: Box<dyn QuoteSink>) -> Result<Self> {
        let (tx, rx) = unbounded::<QuoteRecord>();
        let handle = thread::Builder::new()
            .name("quote-sink".to_string())
            .spawn(move || {
                for record in rx.iter() {
                    if let Err(e) = sink.store(&record) {
                        error!("Error storing quote for {}: {}", record.key, e);
                    }
                    if rx.is_empty() {
                        if let Err(e) = sink.flush() {
                            error!("Error flushing quote sink: {}", e);
                        }
                    }
                }
                if let Err(e) = sink.flush() {
                    error!("Error flushing quote sink: {}", e);
                }
            })?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queues a record. Never blocks and never fails the caller.
    pub fn submit(&self, record: QuoteRecord) {
        let Ok(tx) = self.tx.lock() else {
            error!("Quote sink lock poisoned; dropping record");
            return;
        };
        if let Some(tx) = tx.as_ref() {
            if tx.send(record).is_err() {
                error!("Quote sink worker is gone; dropping record");
            }
        }
    }

    /// Drains queued records and stops the worker.
    pub fn shutdown(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Quote sink worker panicked");
            }
        }
    }
}

impl Drop for SinkWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use quote_common::RawTick;
    use std::sync::Arc;

    fn record(price: f64) -> QuoteRecord {
        let at = Utc.timestamp_opt(1_703_145_600, 0).unwrap();
        QuoteRecord::merge(None, &RawTick::new("NSE", "26000").with_last_price(price), at).unwrap()
    }

    struct FailingSink {
        attempts: Arc<Mutex<usize>>,
    }

    impl QuoteSink for FailingSink {
        fn store(&mut self, _record: &QuoteRecord) -> Result<()> {
            *self.attempts.lock()? += 1;
            Err(FeedError::Sink("disk full".to_string()))
        }
    }

    #[test]
    fn failures_are_swallowed_and_worker_keeps_going() {
        let attempts = Arc::new(Mutex::new(0));
        let worker = SinkWorker::start(Box::new(FailingSink {
            attempts: Arc::clone(&attempts),
        }))
        .unwrap();
        worker.submit(record(1.0));
        worker.submit(record(2.0));
        worker.shutdown();
        assert_eq!(*attempts.lock().unwrap(), 2);
        worker.submit(record(3.0));
    }

    #[test]
    fn json_lines_sink_appends_one_record_per_line() {
        let path = std::env::temp_dir()
            .join(format!("quote_sink_test_{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);
        {
            let worker = SinkWorker::start(Box::new(JsonLinesSink::open(&path).unwrap())).unwrap();
            worker.submit(record(10.5));
            worker.submit(record(11.0));
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: QuoteRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.last_price, 11.0);
        let _ = std::fs::remove_file(&path);
    }
}
