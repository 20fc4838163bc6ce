//! The canonical OHLCV bar and the wire-timestamp normalization layer
//! shared by every adapter.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One OHLCV record for one interval. `open_time` is always normalized to
/// whole Unix seconds and is an exact multiple of the owning store's
/// interval duration.
///
/// `low <= min(open, close) && high >= max(open, close)` is intentionally
/// NOT enforced here: some exchanges report aberrant ticks, and adapters
/// are trusted to hand back whatever the exchange actually said.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Start of the interval this bar summarizes, in whole Unix seconds.
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Base-asset volume traded during the interval.
    pub base_volume: f64,
    /// Quote-asset volume traded during the interval.
    pub quote_volume: f64,
    /// Number of trades. Kept integer end-to-end, never widened to float.
    pub trade_count: u64,
    pub taker_buy_base_volume: f64,
    pub taker_buy_quote_volume: f64,
}

/// Anything an adapter might hand us as a raw wire timestamp.
pub enum TimestampInput<'a> {
    Seconds(i64),
    Millis(i64),
    Micros(i64),
    SecondsFloat(f64),
    DecimalString(&'a str),
    Rfc3339(&'a str),
    Calendar(DateTime<Utc>),
}

impl Bar {
    /// Build a bar from already-normalized fields; `open_time` is taken
    /// verbatim (callers that have a raw wire timestamp should go through
    /// [`ensure_seconds`] first, which every adapter does).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        open_time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        base_volume: f64,
        quote_volume: f64,
        trade_count: u64,
        taker_buy_base_volume: f64,
        taker_buy_quote_volume: f64,
    ) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            base_volume,
            quote_volume,
            trade_count,
            taker_buy_base_volume,
            taker_buy_quote_volume,
        }
    }

    /// Construct from the fixed ten-field array order used by [`Bar::to_array`].
    pub fn from_array(data: [f64; 10]) -> Self {
        Self {
            open_time: data[0] as i64,
            open: data[1],
            high: data[2],
            low: data[3],
            close: data[4],
            base_volume: data[5],
            quote_volume: data[6],
            trade_count: data[7] as u64,
            taker_buy_base_volume: data[8],
            taker_buy_quote_volume: data[9],
        }
    }

    /// Ten-field array, documented order: `open_time, open, high, low,
    /// close, volume, quote_volume, trade_count, taker_buy_base,
    /// taker_buy_quote`.
    pub fn to_array(&self) -> [f64; 10] {
        [
            self.open_time as f64,
            self.open,
            self.high,
            self.low,
            self.close,
            self.base_volume,
            self.quote_volume,
            self.trade_count as f64,
            self.taker_buy_base_volume,
            self.taker_buy_quote_volume,
        ]
    }
}

/// Heuristically detect the unit of a raw numeric timestamp and convert to
/// whole Unix seconds. Also accepts decimal and RFC 3339 strings.
///
/// Thresholds: `> 10^10` is milliseconds, `> 10^13` is microseconds,
/// `> 10^16` is nanoseconds. A value within `[1, 10^10]` is assumed to
/// already be seconds.
pub fn ensure_seconds(input: TimestampInput<'_>) -> Result<i64> {
    match input {
        TimestampInput::Seconds(s) => Ok(detect_and_scale(s)),
        TimestampInput::Millis(ms) => Ok(detect_and_scale(ms)),
        TimestampInput::Micros(us) => Ok(detect_and_scale(us)),
        TimestampInput::SecondsFloat(f) => Ok(detect_and_scale(f as i64)),
        TimestampInput::DecimalString(s) => {
            if let Ok(n) = s.parse::<i64>() {
                return Ok(detect_and_scale(n));
            }
            if let Ok(f) = s.parse::<f64>() {
                return Ok(detect_and_scale(f as i64));
            }
            parse_calendar_string(s)
        }
        TimestampInput::Rfc3339(s) => parse_calendar_string(s),
        TimestampInput::Calendar(dt) => Ok(dt.timestamp()),
    }
}

fn detect_and_scale(n: i64) -> i64 {
    if n.unsigned_abs() > 10_000_000_000_000_000 {
        n / 1_000_000_000
    } else if n.unsigned_abs() > 10_000_000_000_000 {
        n / 1_000_000
    } else if n.unsigned_abs() > 10_000_000_000 {
        n / 1_000
    } else {
        n
    }
}

fn parse_calendar_string(s: &str) -> Result<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc).timestamp());
    }
    // No offset present: assume UTC, per the contract.
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc().timestamp());
    }
    Err(Error::Shape(format!("could not parse timestamp string: {s}")))
}

/// Declares the wire unit an adapter natively speaks; governs how the
/// adapter contract's `convert_to_exchange`/`ensure_seconds` helpers behave
/// for that adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampUnit {
    Seconds,
    Milliseconds,
    Microseconds,
    Iso8601,
}

/// Convert a canonical seconds timestamp into the unit an adapter's
/// exchange expects on the wire.
pub fn convert_to_exchange(t_seconds: i64, unit: TimestampUnit) -> String {
    match unit {
        TimestampUnit::Seconds => t_seconds.to_string(),
        TimestampUnit::Milliseconds => (t_seconds * 1_000).to_string(),
        TimestampUnit::Microseconds => (t_seconds * 1_000_000).to_string(),
        TimestampUnit::Iso8601 => DateTime::<Utc>::from_timestamp(t_seconds, 0)
            .expect("valid timestamp")
            .to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_array() {
        let bar = Bar::new(60, 1.0, 2.0, 0.5, 1.5, 10.0, 15.0, 42, 4.0, 6.0);
        let back = Bar::from_array(bar.to_array());
        assert_eq!(bar, back);
    }

    #[test]
    fn ensure_seconds_detects_each_magnitude() {
        for t in [1_000_000_000_i64, 1_700_000_000, 9_999_999_999] {
            assert_eq!(ensure_seconds(TimestampInput::Seconds(t)).unwrap(), t);
            assert_eq!(ensure_seconds(TimestampInput::Seconds(t * 1_000)).unwrap(), t);
            assert_eq!(
                ensure_seconds(TimestampInput::Seconds(t * 1_000_000)).unwrap(),
                t
            );
            assert_eq!(
                ensure_seconds(TimestampInput::Seconds(t * 1_000_000_000)).unwrap(),
                t
            );
        }
    }

    #[test]
    fn convert_then_ensure_is_identity_for_every_unit() {
        let t = 1_753_000_000_i64;
        for unit in [
            TimestampUnit::Seconds,
            TimestampUnit::Milliseconds,
            TimestampUnit::Microseconds,
        ] {
            let wire = convert_to_exchange(t, unit);
            let n: i64 = wire.parse().unwrap();
            assert_eq!(ensure_seconds(TimestampInput::Seconds(n)).unwrap(), t);
        }

        let wire = convert_to_exchange(t, TimestampUnit::Iso8601);
        assert_eq!(
            ensure_seconds(TimestampInput::Rfc3339(&wire)).unwrap(),
            t
        );
    }

    #[test]
    fn parses_rfc3339_without_offset_as_utc() {
        let got = ensure_seconds(TimestampInput::DecimalString("2025-01-01T00:00:00")).unwrap();
        let want = chrono::NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp();
        assert_eq!(got, want);
    }
}
