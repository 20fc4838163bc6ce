//! Binance spot/perpetual adapter. Binance's kline REST rows are
//! arrays-of-arrays; its WebSocket kline events wrap the same fields in a
//! `{"e": "kline", "k": {...}}` envelope. Timestamps are milliseconds for
//! both markets: spot and perpetual are pinned to the same wire unit here
//! rather than carrying a per-market distinction neither API needs.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bar::{ensure_seconds, Bar, TimestampInput, TimestampUnit};
use crate::error::{Error, Result};

use super::{
    AdapterUrls, ExchangeAdapter, FetchMode, IntervalTable, KeepAlive, MarketKind, RestParams,
};

const SPOT_REST_URL: &str = "https://api.binance.com/api/v3/klines";
const SPOT_WS_URL: &str = "wss://stream.binance.com:9443/ws";
const PERPETUAL_REST_URL: &str = "https://fapi.binance.com/fapi/v1/klines";
const PERPETUAL_WS_URL: &str = "wss://fstream.binance.com/ws";

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
            ("8h", 28_800),
            ("12h", 43_200),
            ("1d", 86_400),
            ("3d", 259_200),
            ("1w", 604_800),
        ])
    })
}

fn ws_interval_set() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| interval_table().keys().copied().collect())
}

/// Binance spot or perpetual (USDT-M futures) adapter. Both markets share
/// this one implementation; only the configured URLs and `market` differ.
pub struct BinanceAdapter {
    market: MarketKind,
    urls: AdapterUrls,
}

impl BinanceAdapter {
    pub fn spot() -> Self {
        Self::spot_with_urls(AdapterUrls {
            rest: SPOT_REST_URL.to_string(),
            ws: SPOT_WS_URL.to_string(),
        })
    }

    pub fn perpetual() -> Self {
        Self::perpetual_with_urls(AdapterUrls {
            rest: PERPETUAL_REST_URL.to_string(),
            ws: PERPETUAL_WS_URL.to_string(),
        })
    }

    /// Construct with injected URLs, e.g. pointed at the mock server.
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
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn exchange_id(&self) -> &'static str {
        "binance"
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
        // Binance's combined streams expect the client to answer server
        // pings with protocol-level pongs; tungstenite does this for us
        // automatically, so no client-initiated keep-alive is needed.
        KeepAlive::None
    }

    fn rest_params(&self, params: &RestParams) -> Vec<(String, String)> {
        let mut q = vec![
            ("symbol".to_string(), self.format_pair(&params.pair)),
            ("interval".to_string(), params.interval.clone()),
        ];
        if let Some(start) = params.start_time {
            q.push(("startTime".to_string(), crate::bar::convert_to_exchange(start, self.timestamp_unit())));
        }
        if let Some(end) = params.end_time {
            q.push(("endTime".to_string(), crate::bar::convert_to_exchange(end, self.timestamp_unit())));
        }
        if let Some(limit) = params.limit {
            q.push(("limit".to_string(), limit.to_string()));
        }
        q
    }

    fn parse_rest(&self, payload: &Value) -> Result<Vec<Bar>> {
        let rows = match payload {
            Value::Null => return Ok(vec![]),
            Value::Array(rows) => rows,
            other => return Err(Error::Shape(format!("expected array, got {other}"))),
        };

        let mut bars = Vec::with_capacity(rows.len());
        for row in rows {
            let row = match row.as_array() {
                Some(r) if r.len() >= 11 => r,
                _ => continue, // malformed row: skip, don't fail the whole batch
            };
            let open_time = match row[0].as_i64() {
                Some(t) => ensure_seconds(TimestampInput::Millis(t))?,
                None => continue,
            };
            let parse_f64 = |v: &Value| v.as_str().and_then(|s| s.parse::<f64>().ok()).unwrap_or(0.0);
            bars.push(Bar::new(
                open_time,
                parse_f64(&row[1]),
                parse_f64(&row[2]),
                parse_f64(&row[3]),
                parse_f64(&row[4]),
                parse_f64(&row[5]),
                parse_f64(&row[7]),
                row[8].as_u64().unwrap_or(0),
                parse_f64(&row[9]),
                parse_f64(&row[10]),
            ));
        }
        Ok(bars)
    }

    fn ws_subscribe_payload(&self, pair: &str, interval: &str) -> Value {
        let stream = format!("{}@kline_{}", self.format_pair(pair).to_lowercase(), interval);
        json!({
            "method": "SUBSCRIBE",
            "params": [stream],
            "id": 1,
        })
    }

    fn parse_ws(&self, frame: &Value) -> Result<Option<Vec<Bar>>> {
        let Some(k) = frame.get("k") else {
            return Ok(None);
        };
        let Some(open_time_ms) = k.get("t").and_then(Value::as_i64) else {
            return Ok(None);
        };
        let parse_f64 = |key: &str| {
            k.get(key)
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.0)
        };
        let bar = Bar::new(
            ensure_seconds(TimestampInput::Millis(open_time_ms))?,
            parse_f64("o"),
            parse_f64("h"),
            parse_f64("l"),
            parse_f64("c"),
            parse_f64("v"),
            parse_f64("q"),
            k.get("n").and_then(Value::as_u64).unwrap_or(0),
            parse_f64("V"),
            parse_f64("Q"),
        );
        Ok(Some(vec![bar]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rest_array_of_arrays() {
        let adapter = BinanceAdapter::spot();
        let payload = json!([
            [1_700_000_000_000_i64, "100.0", "110.0", "90.0", "105.0", "12.5", 0, "1300.0", 42, "6.0", "650.0", "0"]
        ]);
        let bars = adapter.parse_rest(&payload).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].open_time, 1_700_000_000);
        assert_eq!(bars[0].trade_count, 42);
    }

    #[test]
    fn parses_ws_kline_envelope() {
        let adapter = BinanceAdapter::spot();
        let frame = json!({
            "e": "kline",
            "k": {
                "t": 1_700_000_000_000_i64, "o": "100.0", "h": "110.0", "l": "90.0", "c": "105.0",
                "v": "12.5", "q": "1300.0", "n": 42, "V": "6.0", "Q": "650.0"
            }
        });
        let bars = adapter.parse_ws(&frame).unwrap().unwrap();
        assert_eq!(bars[0].open_time, 1_700_000_000);
    }

    #[test]
    fn non_kline_frame_is_absent_not_error() {
        let adapter = BinanceAdapter::spot();
        let frame = json!({"result": null, "id": 1});
        assert!(adapter.parse_ws(&frame).unwrap().is_none());
    }

    #[test]
    fn null_rest_payload_is_empty() {
        let adapter = BinanceAdapter::spot();
        assert!(adapter.parse_rest(&Value::Null).unwrap().is_empty());
    }
}
