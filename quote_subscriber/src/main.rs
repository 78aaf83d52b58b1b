//! Quote feed subscriber.
//!
//! Connects to a running publisher, replicates its quotes and logs a bar batch
//! whenever the upstream quote time moves. Warns when the feed goes stale.
//!
//! Usage example (CLI):
//! ```bash
//! quote_subscriber --address tcp://127.0.0.1:40123 --mappings ./tokens.txt
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
use log::{debug, info, warn};
use quote_common::instruments::parse_token_mappings;
use quote_common::{FeedAddress, FeedError, Result, TokenMapping};
use quote_subscriber::{FeedOptions, LiveQuoteFeed};

use crate::args::Args;

/// Order updates held before new ones are dropped.
const ORDER_BUFFER: usize = 1024;

fn main() -> Result<(), FeedError> {
    init_logger();
    let args = Args::parse();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            info!("Ctrl+C received. Shutting down subscriber...");
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| FeedError::Io(std::io::Error::other(e.to_string())))?;
    }

    let mappings = parse_token_mappings(BufReader::new(File::open(&args.mappings)?))?;
    let mapping = TokenMapping::from_all(&mappings)?;
    let address = match &args.address {
        Some(address) => address.parse()?,
        None => FeedAddress::platform_default(),
    };

    let options = FeedOptions {
        order_buffer: args.orders.then_some(ORDER_BUFFER),
        ..FeedOptions::default()
    };
    let feed = LiveQuoteFeed::builder(address, mapping)
        .options(options)
        .connect()?;
    let heartbeat = Duration::from_secs(args.heartbeat);
    let poll = Duration::from_millis(args.poll_ms);

    info!("Subscriber is running. Press Ctrl+C to exit.");
    let mut was_alive = false;
    while !shutdown.load(Ordering::SeqCst) && !feed.is_stopped() {
        if let Some(batch) = feed.next_bars() {
            for bar in batch.bars.values() {
                info!(
                    "BAR: {} {} Close={:.2} Volume={} OI={}",
                    bar.timestamp, bar.instrument, bar.close, bar.volume, bar.open_interest
                );
            }
        }
        if let Some(orders) = feed.order_updates() {
            for order in orders.try_iter() {
                info!("ORDER: {}", order);
            }
        }

        let alive = feed.is_alive(heartbeat);
        if was_alive && !alive {
            warn!(
                "No quote for {}s (last quote: {:?})",
                heartbeat.as_secs(),
                feed.last_quote_time()
            );
        }
        was_alive = alive;
        debug!("Next bars at {:?}", feed.next_bars_time());
        thread::sleep(poll);
    }

    feed.stop();
    Ok(())
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
