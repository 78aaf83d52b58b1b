//! Wall-clock source.
//!
//! Feed timestamps are wall-clock (`DateTime<Utc>`) because they are compared
//! against exchange-reported times. The clock is injected so staleness and bar
//! timestamps can be driven deterministically in tests.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, SubsecRound, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for simulations and tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Starts the clock at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }

    /// Sets the clock to `to`.
    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Drops the sub-second part of a timestamp.
pub fn truncate_to_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(0)
}

/// The two clocks a feed endpoint keeps about its upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedTimes {
    /// Resolved timestamp of the most recently merged quote.
    pub last_quote: Option<DateTime<Utc>>,
    /// Local wall-clock time of the most recent merge.
    pub last_received: Option<DateTime<Utc>>,
}

impl FeedTimes {
    /// Records a merged quote.
    pub fn record(&mut self, quote_timestamp: DateTime<Utc>, received_at: DateTime<Utc>) {
        self.last_quote = Some(quote_timestamp);
        self.last_received = Some(received_at);
    }
}

impl fmt::Display for FeedTimes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |t: Option<DateTime<Utc>>| t.map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
        write!(
            f,
            "Last Quote: {}\tLast Received: {}",
            show(self.last_quote),
            show(self.last_received)
        )
    }
}
