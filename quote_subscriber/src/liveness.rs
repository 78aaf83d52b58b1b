//! Feed staleness check.

use std::time::Duration;

use chrono::{DateTime, Utc};
use quote_common::FeedTimes;

/// Heartbeat threshold used when the caller has no opinion.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(5);

/// `false` before the first quote; afterwards `true` iff the last quote time is
/// no more than `threshold` behind `now`.
pub fn is_alive(times: &FeedTimes, now: DateTime<Utc>, threshold: Duration) -> bool {
    let Some(last_quote) = times.last_quote else {
        return false;
    };
    match (now - last_quote).to_std() {
        Ok(elapsed) => elapsed <= threshold,
        // Quote time ahead of the local clock.
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.timestamp_opt(1_703_145_600, 0).unwrap()
    }

    #[test]
    fn dead_before_first_quote() {
        assert!(!is_alive(&FeedTimes::default(), start(), DEFAULT_HEARTBEAT));
    }

    #[test]
    fn alive_until_threshold_passes() {
        let mut times = FeedTimes::default();
        times.record(start(), start());
        let secs = |s| start() + chrono::Duration::seconds(s);

        assert!(is_alive(&times, start(), DEFAULT_HEARTBEAT));
        assert!(is_alive(&times, secs(5), DEFAULT_HEARTBEAT));
        assert!(!is_alive(&times, secs(6), DEFAULT_HEARTBEAT));
        assert!(is_alive(&times, secs(-2), DEFAULT_HEARTBEAT));
    }
}
