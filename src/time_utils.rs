//! Time-related utility functions, ported from the reference
//! `round_timestamp_to_interval` / `calculate_start_end_times` /
//! `current_timestamp_s` helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Round a timestamp down to the nearest multiple of `interval_seconds`.
pub fn round_down(timestamp: i64, interval_seconds: i64) -> i64 {
    timestamp - timestamp.rem_euclid(interval_seconds)
}

/// Compute a `(start, end)` pair covering `num_bars` bars of `interval_seconds`
/// ending at (and including) the interval containing `end_time`.
pub fn start_end_for_count(end_time: i64, interval_seconds: i64, num_bars: i64) -> (i64, i64) {
    let rounded_end = round_down(end_time, interval_seconds);
    let start_time = rounded_end - (num_bars - 1) * interval_seconds;
    (start_time, rounded_end)
}

/// Current wall-clock time in whole seconds since the Unix epoch.
pub fn now_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_secs() as i64
}

/// Duration in seconds of a canonical interval token (`"1m"`, `"1h"`, ...).
/// Exchange-agnostic: the mock server uses this to drive its background
/// generator without depending on any one adapter's interval table.
pub fn canonical_interval_seconds(interval: &str) -> Option<i64> {
    match interval {
        "1m" => Some(60),
        "3m" => Some(180),
        "5m" => Some(300),
        "15m" => Some(900),
        "30m" => Some(1_800),
        "1h" => Some(3_600),
        "2h" => Some(7_200),
        "4h" => Some(14_400),
        "6h" => Some(21_600),
        "8h" => Some(28_800),
        "12h" => Some(43_200),
        "1d" => Some(86_400),
        "3d" => Some(259_200),
        "1w" => Some(604_800),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_down_is_a_multiple_and_within_one_interval() {
        for t in [0_i64, 1, 59, 60, 61, 3599, 3600, 1_753_000_001] {
            for delta in [1_i64, 60, 3600] {
                let r = round_down(t, delta);
                assert_eq!(r % delta, 0);
                assert!(t - delta < r && r <= t);
            }
        }
    }

    #[test]
    fn start_end_spans_exactly_num_bars() {
        let (start, end) = start_end_for_count(1_000_000_060, 60, 10);
        assert_eq!(end, 1_000_000_020);
        assert_eq!((end - start) / 60 + 1, 10);
    }

    #[test]
    fn canonical_interval_seconds_covers_minutes_hours_and_days() {
        assert_eq!(canonical_interval_seconds("1m"), Some(60));
        assert_eq!(canonical_interval_seconds("1h"), Some(3_600));
        assert_eq!(canonical_interval_seconds("1d"), Some(86_400));
        assert_eq!(canonical_interval_seconds("nonsense"), None);
    }
}
