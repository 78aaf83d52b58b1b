//! Quote feed publisher.
//!
//! Streams ticks from a (simulated) broker session to local subscriber
//! processes. The bound feed address is logged at startup; hand it to the
//! subscribers.
//!
//! Usage example (CLI):
//! ```bash
//! quote_publisher --mappings ./tokens.txt --address tcp://127.0.0.1:0 --sink ./quotes.jsonl
//! ```
#![warn(missing_docs)]
mod args;

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use quote_common::instruments::parse_token_mappings;
use quote_common::{FeedAddress, FeedError, Result, TokenMapping};
use quote_publisher::simulator::SimulatedSession;
use quote_publisher::{JsonLinesSink, PublisherConfig, QuoteFeedPublisher, QuoteSink};

use crate::args::Args;

fn main() -> Result<(), FeedError> {
    init_logger();
    let args = Args::parse();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            info!("Ctrl+C received. Shutting down publisher...");
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| FeedError::Io(std::io::Error::other(e.to_string())))?;
    }

    let mappings = parse_token_mappings(BufReader::new(File::open(&args.mappings)?))?;
    let mapping = if args.instruments.is_empty() {
        TokenMapping::from_all(&mappings)?
    } else {
        TokenMapping::new(&mappings, &args.instruments)?
    };
    info!("Streaming {} instruments", mapping.len());

    let address = match &args.address {
        Some(address) => address.parse()?,
        None => FeedAddress::platform_default(),
    };
    let session = Arc::new(SimulatedSession::new(Duration::from_millis(args.interval_ms)));
    let mut builder = QuoteFeedPublisher::builder(session, mapping).config(PublisherConfig {
        address,
        ..PublisherConfig::default()
    });
    if let Some(path) = &args.sink {
        let sink: Box<dyn QuoteSink> = Box::new(JsonLinesSink::open(path)?);
        builder = builder.sink(sink);
    }
    let publisher = builder.build()?;
    info!("IPC path: {}", publisher.address());

    publisher.start()?;
    if let Err(e) = publisher.wait_initialized(Duration::from_secs(args.timeout)) {
        error!("Feed failed to initialize: {}", e);
        publisher.stop();
        return Err(e);
    }

    info!("Publisher is running. Press Ctrl+C to exit.");
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }
    publisher.stop();
    Ok(())
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
