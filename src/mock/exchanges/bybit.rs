//! Bybit spot/linear-perpetual mock plugin. Like the Binance plugin,
//! routes are namespaced by plugin id rather than sharing Bybit's real
//! `/v5/market/kline` path across both markets, since this simulator
//! multiplexes every exchange behind one socket.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::adapter::MarketKind;
use crate::bar::Bar;
use crate::mock::plugin::{ExchangePlugin, RestQuery};

pub struct BybitPlugin {
    market: MarketKind,
}

impl BybitPlugin {
    pub fn spot() -> Self {
        Self { market: MarketKind::Spot }
    }

    pub fn perpetual() -> Self {
        Self { market: MarketKind::Perpetual }
    }

    fn category(&self) -> &'static str {
        match self.market {
            MarketKind::Spot => "spot",
            MarketKind::Perpetual => "linear",
        }
    }
}

fn canonical_interval(wire: &str) -> String {
    match wire {
        "1" => "1m",
        "3" => "3m",
        "5" => "5m",
        "15" => "15m",
        "30" => "30m",
        "60" => "1h",
        "120" => "2h",
        "240" => "4h",
        "360" => "6h",
        "720" => "12h",
        "D" => "1d",
        "W" => "1w",
        other => other,
    }
    .to_string()
}

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
        _ => "1",
    }
}

impl ExchangePlugin for BybitPlugin {
    fn id(&self) -> &'static str {
        match self.market {
            MarketKind::Spot => "bybit_spot",
            MarketKind::Perpetual => "bybit_perpetual",
        }
    }

    fn rest_path(&self) -> &'static str {
        match self.market {
            MarketKind::Spot => "/bybit_spot/v5/market/kline",
            MarketKind::Perpetual => "/bybit_perpetual/v5/market/kline",
        }
    }

    fn ws_path(&self) -> &'static str {
        match self.market {
            MarketKind::Spot => "/bybit_spot/v5/public/spot",
            MarketKind::Perpetual => "/bybit_perpetual/v5/public/linear",
        }
    }

    fn parse_rest_query(&self, params: &HashMap<String, String>) -> RestQuery {
        RestQuery {
            symbol: params.get("symbol").cloned().unwrap_or_default(),
            interval: params.get("interval").map(|w| canonical_interval(w)).unwrap_or_else(|| "1m".to_string()),
            start_time: params.get("start").and_then(|v| v.parse::<i64>().ok()).map(|ms| ms / 1000),
            end_time: params.get("end").and_then(|v| v.parse::<i64>().ok()).map(|ms| ms / 1000),
            limit: params.get("limit").and_then(|v| v.parse::<u32>().ok()),
        }
    }

    fn format_rest_response(&self, bars: &[Bar]) -> Value {
        // Bybit returns newest-first.
        let list: Vec<Value> = bars
            .iter()
            .rev()
            .map(|b| {
                json!([
                    (b.open_time * 1000).to_string(),
                    b.open.to_string(),
                    b.high.to_string(),
                    b.low.to_string(),
                    b.close.to_string(),
                    b.base_volume.to_string(),
                    b.quote_volume.to_string(),
                ])
            })
            .collect();
        json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": {
                "category": self.category(),
                "list": list,
            }
        })
    }

    fn format_ws_frame(&self, pair: &str, interval: &str, bar: &Bar) -> Value {
        json!({
            "topic": format!("kline.{}.{}", wire_interval(interval), pair),
            "type": "snapshot",
            "data": [{
                "start": bar.open_time * 1000,
                "end": bar.open_time * 1000 + 59_999,
                "interval": wire_interval(interval),
                "open": bar.open.to_string(),
                "high": bar.high.to_string(),
                "low": bar.low.to_string(),
                "close": bar.close.to_string(),
                "volume": bar.base_volume.to_string(),
                "turnover": bar.quote_volume.to_string(),
                "confirm": false,
            }]
        })
    }

    fn parse_subscription_frame(&self, frame: &Value) -> Option<Vec<(String, String)>> {
        if frame.get("op").and_then(Value::as_str) != Some("subscribe") {
            return None;
        }
        let args = frame.get("args")?.as_array()?;
        let mut out = Vec::new();
        for a in args {
            let topic = a.as_str()?;
            let mut parts = topic.splitn(3, '.');
            if parts.next()? != "kline" {
                continue;
            }
            let interval = canonical_interval(parts.next()?);
            let symbol = parts.next()?.to_string();
            out.push((symbol, interval));
        }
        Some(out)
    }

    fn subscription_ack(&self, _pair: &str, _interval: &str) -> Value {
        json!({"success": true, "ret_msg": "subscribe", "op": "subscribe"})
    }
}
