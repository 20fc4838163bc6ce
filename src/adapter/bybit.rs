//! Bybit spot/linear-perpetual adapter (Bybit v5 unified API). REST klines
//! come back as `[start, open, high, low, close, volume, turnover]` string
//! arrays, newest first; WebSocket kline topics deliver the same fields as
//! an object list under `"topic": "kline.<interval>.<symbol>"`. Both
//! markets use milliseconds, consistent with the Binance adapter.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bar::{ensure_seconds, Bar, TimestampInput, TimestampUnit};
use crate::error::{Error, Result};

use super::{
    AdapterUrls, ExchangeAdapter, FetchMode, IntervalTable, KeepAlive, MarketKind, RestParams,
};

const REST_URL: &str = "https://api.bybit.com/v5/market/kline";
const WS_URL_SPOT: &str = "wss://stream.bybit.com/v5/public/spot";
const WS_URL_LINEAR: &str = "wss://stream.bybit.com/v5/public/linear";

fn interval_table() -> &'static IntervalTable {
    static TABLE: OnceLock<IntervalTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            ("1m", 60),
            ("3m", 180),
            ("5m", 300),
            ("15m", 900),
            ("30m", 1_800),
            ("1h", 3_600),
            ("2h", 7_200),
            ("4h", 14_400),
            ("6h", 21_600),
            ("12h", 43_200),
            ("1d", 86_400),
            ("1w", 604_800),
        ])
    })
}

/// Bybit's own interval tokens, keyed by the canonical names above. The
/// wire protocol uses bare minute counts or `"D"`/`"W"`, not `"1m"`/`"1d"`.
fn wire_interval(canonical: &str) -> &'static str {
    match canonical {
        "1m" => "1",
        "3m" => "3",
        "5m" => "5",
        "15m" => "15",
        "30m" => "30",
        "1h" => "60",
        "2h" => "120",
        "4h" => "240",
        "6h" => "360",
        "12h" => "720",
        "1d" => "D",
        "1w" => "W",
        _ => canonical,
    }
}

fn ws_interval_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| interval_table().keys().copied().collect())
}

/// Bybit spot or linear-perpetual adapter.
pub struct BybitAdapter {
    market: MarketKind,
    urls: AdapterUrls,
}

impl BybitAdapter {
    pub fn spot() -> Self {
        Self::spot_with_urls(AdapterUrls {
            rest: REST_URL.to_string(),
            ws: WS_URL_SPOT.to_string(),
        })
    }

    pub fn perpetual() -> Self {
        Self::perpetual_with_urls(AdapterUrls {
            rest: REST_URL.to_string(),
            ws: WS_URL_LINEAR.to_string(),
        })
    }

    pub fn spot_with_urls(urls: AdapterUrls) -> Self {
        Self {
            market: MarketKind::Spot,
            urls,
        }
    }

    pub fn perpetual_with_urls(urls: AdapterUrls) -> Self {
        Self {
            market: MarketKind::Perpetual,
            urls,
        }
    }

    fn category(&self) -> &'static str {
        match self.market {
            MarketKind::Spot => "spot",
            MarketKind::Perpetual => "linear",
        }
    }
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    fn exchange_id(&self) -> &'static str {
        "bybit"
    }

    fn market_kind(&self) -> MarketKind {
        self.market
    }

    fn fetch_mode(&self) -> FetchMode {
        FetchMode::Async
    }

    fn format_pair(&self, pair: &str) -> String {
        pair.replace('-', "").to_uppercase()
    }

    fn rest_url(&self) -> &str {
        &self.urls.rest
    }

    fn ws_url(&self) -> &str {
        &self.urls.ws
    }

    fn supported_intervals(&self) -> &IntervalTable {
        interval_table()
    }

    fn ws_supported_intervals(&self) -> &HashSet<&'static str> {
        ws_interval_set()
    }

    fn timestamp_unit(&self) -> TimestampUnit {
        TimestampUnit::Milliseconds
    }

    fn keep_alive(&self) -> KeepAlive {
        // Bybit's public WS connections are dropped if no message is sent
        // for 20s; the client must originate a text "ping" on an interval.
        KeepAlive::PingText {
            interval_seconds: 18,
        }
    }

    fn rest_params(&self, params: &RestParams) -> Vec<(String, String)> {
        let mut q = vec![
            ("category".to_string(), self.category().to_string()),
            ("symbol".to_string(), self.format_pair(&params.pair)),
            (
                "interval".to_string(),
                wire_interval(&params.interval).to_string(),
            ),
        ];
        if let Some(start) = params.start_time {
            q.push(("start".to_string(), crate::bar::convert_to_exchange(start, self.timestamp_unit())));
        }
        if let Some(end) = params.end_time {
            q.push(("end".to_string(), crate::bar::convert_to_exchange(end, self.timestamp_unit())));
        }
        if let Some(limit) = params.limit {
            q.push(("limit".to_string(), limit.to_string()));
        }
        q
    }

    fn parse_rest(&self, payload: &Value) -> Result<Vec<Bar>> {
        let list = match payload.get("result").and_then(|r| r.get("list")) {
            None => return Ok(vec![]),
            Some(Value::Null) => return Ok(vec![]),
            Some(Value::Array(list)) => list,
            Some(other) => return Err(Error::Shape(format!("expected list array, got {other}"))),
        };

        let mut bars = Vec::with_capacity(list.len());
        for row in list {
            let row = match row.as_array() {
                Some(r) if r.len() >= 7 => r,
                _ => continue,
            };
            let parse_f64 = |v: &Value| v.as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
            let open_time_ms = match row[0].as_str().and_then(|s| s.parse::<i64>().ok()) {
                Some(t) => t,
                None => continue,
            };
            bars.push(Bar::new(
                ensure_seconds(TimestampInput::Millis(open_time_ms))?,
                parse_f64(&row[1]),
                parse_f64(&row[2]),
                parse_f64(&row[3]),
                parse_f64(&row[4]),
                parse_f64(&row[5]),
                parse_f64(&row[6]),
                0, // Bybit's kline REST response carries no trade count
                0.0,
                0.0,
            ));
        }
        // Bybit returns newest-first; the store expects ascending order.
        bars.reverse();
        Ok(bars)
    }

    fn ws_subscribe_payload(&self, pair: &str, interval: &str) -> Value {
        let topic = format!("kline.{}.{}", wire_interval(interval), self.format_pair(pair));
        json!({
            "op": "subscribe",
            "args": [topic],
        })
    }

    fn parse_ws(&self, frame: &Value) -> Result<Option<Vec<Bar>>> {
        let Some(topic) = frame.get("topic").and_then(Value::as_str) else {
            return Ok(None);
        };
        if !topic.starts_with("kline.") {
            return Ok(None);
        }
        let Some(entries) = frame.get("data").and_then(Value::as_array) else {
            return Ok(None);
        };

        let mut bars = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(start_ms) = entry.get("start").and_then(Value::as_i64) else {
                continue;
            };
            let parse_f64 = |key: &str| {
                entry
                    .get(key)
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(0.0)
            };
            bars.push(Bar::new(
                ensure_seconds(TimestampInput::Millis(start_ms))?,
                parse_f64("open"),
                parse_f64("high"),
                parse_f64("low"),
                parse_f64("close"),
                parse_f64("volume"),
                parse_f64("turnover"),
                0,
                0.0,
                0.0,
            ));
        }
        if bars.is_empty() {
            Ok(None)
        } else {
            Ok(Some(bars))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rest_list_and_reverses_to_ascending_order() {
        let adapter = BybitAdapter::spot();
        let payload = json!({
            "result": {
                "list": [
                    ["1700000120000", "101", "111", "91", "106", "13.0", "1400.0"],
                    ["1700000000000", "100", "110", "90", "105", "12.5", "1300.0"],
                ]
            }
        });
        let bars = adapter.parse_rest(&payload).unwrap();
        assert_eq!(bars.len(), 2);
        assert!(bars[0].open_time < bars[1].open_time);
    }

    #[test]
    fn parses_ws_kline_topic() {
        let adapter = BybitAdapter::perpetual();
        let frame = json!({
            "topic": "kline.1.BTCUSDT",
            "data": [{"start": 1_700_000_000_000_i64, "open": "100", "high": "110", "low": "90", "close": "105", "volume": "12.5", "turnover": "1300.0"}]
        });
        let bars = adapter.parse_ws(&frame).unwrap().unwrap();
        assert_eq!(bars[0].open_time, 1_700_000_000);
    }

    #[test]
    fn non_kline_topic_is_absent() {
        let adapter = BybitAdapter::spot();
        let frame = json!({"success": true, "op": "subscribe"});
        assert!(adapter.parse_ws(&frame).unwrap().is_none());
    }

    #[test]
    fn wire_interval_maps_day_and_week_to_letters() {
        assert_eq!(wire_interval("1d"), "D");
        assert_eq!(wire_interval("1w"), "W");
        assert_eq!(wire_interval("1h"), "60");
    }
}
