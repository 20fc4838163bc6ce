//! Binance spot/perpetual mock plugin. Routes are namespaced by plugin id
//! (`/binance_spot/...`, `/binance_perpetual/...`) since this simulator
//! multiplexes every registered exchange behind one listening socket,
//! where a real deployment would use distinct hosts
//! (`api.binance.com` vs `fapi.binance.com`) for the two markets.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::adapter::MarketKind;
use crate::bar::Bar;
use crate::mock::plugin::{ExchangePlugin, RestQuery};

pub struct BinancePlugin {
    market: MarketKind,
}

impl BinancePlugin {
    pub fn spot() -> Self {
        Self { market: MarketKind::Spot }
    }

    pub fn perpetual() -> Self {
        Self { market: MarketKind::Perpetual }
    }
}

impl ExchangePlugin for BinancePlugin {
    fn id(&self) -> &'static str {
        match self.market {
            MarketKind::Spot => "binance_spot",
            MarketKind::Perpetual => "binance_perpetual",
        }
    }

    fn rest_path(&self) -> &'static str {
        match self.market {
            MarketKind::Spot => "/binance_spot/api/v3/klines",
            MarketKind::Perpetual => "/binance_perpetual/fapi/v1/klines",
        }
    }

    fn ws_path(&self) -> &'static str {
        match self.market {
            MarketKind::Spot => "/binance_spot/ws",
            MarketKind::Perpetual => "/binance_perpetual/ws",
        }
    }

    fn parse_rest_query(&self, params: &HashMap<String, String>) -> RestQuery {
        RestQuery {
            symbol: params.get("symbol").cloned().unwrap_or_default(),
            interval: params.get("interval").cloned().unwrap_or_else(|| "1m".to_string()),
            start_time: params.get("startTime").and_then(|v| v.parse::<i64>().ok()).map(|ms| ms / 1000),
            end_time: params.get("endTime").and_then(|v| v.parse::<i64>().ok()).map(|ms| ms / 1000),
            limit: params.get("limit").and_then(|v| v.parse::<u32>().ok()),
        }
    }

    fn format_rest_response(&self, bars: &[Bar]) -> Value {
        json!(bars
            .iter()
            .map(|b| json!([
                b.open_time * 1000,
                b.open.to_string(),
                b.high.to_string(),
                b.low.to_string(),
                b.close.to_string(),
                b.base_volume.to_string(),
                b.open_time * 1000 + 59_999,
                b.quote_volume.to_string(),
                b.trade_count,
                b.taker_buy_base_volume.to_string(),
                b.taker_buy_quote_volume.to_string(),
                "0",
            ]))
            .collect::<Vec<_>>())
    }

    fn format_ws_frame(&self, pair: &str, interval: &str, bar: &Bar) -> Value {
        json!({
            "e": "kline",
            "E": bar.open_time * 1000,
            "s": pair,
            "k": {
                "t": bar.open_time * 1000,
                "T": bar.open_time * 1000 + 59_999,
                "s": pair,
                "i": interval,
                "o": bar.open.to_string(),
                "h": bar.high.to_string(),
                "l": bar.low.to_string(),
                "c": bar.close.to_string(),
                "v": bar.base_volume.to_string(),
                "q": bar.quote_volume.to_string(),
                "n": bar.trade_count,
                "V": bar.taker_buy_base_volume.to_string(),
                "Q": bar.taker_buy_quote_volume.to_string(),
                "x": false,
            }
        })
    }

    fn parse_subscription_frame(&self, frame: &Value) -> Option<Vec<(String, String)>> {
        if frame.get("method").and_then(Value::as_str) != Some("SUBSCRIBE") {
            return None;
        }
        let params = frame.get("params")?.as_array()?;
        let mut out = Vec::new();
        for p in params {
            let stream = p.as_str()?;
            let (symbol, rest) = stream.split_once("@kline_")?;
            out.push((symbol.to_uppercase(), rest.to_string()));
        }
        Some(out)
    }

    fn subscription_ack(&self, _pair: &str, _interval: &str) -> Value {
        json!({"result": null, "id": 1})
    }
}
