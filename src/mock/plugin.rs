//! The per-exchange plugin contract the mock server dispatches to. A 1:1
//! port of `ExchangePlugin` from the source's mocking resources: REST/WS
//! route tables, formatters, a subscription-frame parser, an
//! acknowledgement constructor, a subscription-key function, and a
//! REST-query normalizer, with default trait methods standing in for the
//! Python base class's default `@property` overrides. No authenticated
//! channels exist in this simulator, so there is no test-API-key override
//! to carry — only rate limits and network settings are configurable.

use std::time::Duration;

use serde_json::Value;

use crate::bar::Bar;

/// Normalized REST query parameters, regardless of an exchange's own
/// parameter names.
#[derive(Debug, Clone)]
pub struct RestQuery {
    pub symbol: String,
    pub interval: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub limit: Option<u32>,
}

/// Keep-alive shape the mock server expects a connected client to use;
/// mirrors [`crate::adapter::KeepAlive`] but lives independently here
/// since a test may run the simulator without instantiating a real
/// adapter at all.
#[derive(Debug, Clone, Copy)]
pub struct NetworkSettings {
    pub keep_alive_interval: Duration,
    pub subscription_ack_required: bool,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(20),
            subscription_ack_required: true,
        }
    }
}

/// A per-IP rate limit: `max_weight` request-weight units per
/// `window`. The mock server's generic handler envelope enforces this
/// uniformly; plugins only declare the numbers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max_weight: u32,
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_weight: 1200,
            window: Duration::from_secs(60),
        }
    }
}

/// Exchange-specific glue the generic mock server dispatches to. One
/// implementation per (exchange, market); registered in
/// [`crate::mock::server::MockServer`].
pub trait ExchangePlugin: Send + Sync {
    /// Stable id, e.g. `"binance_spot"`, used as the plugin's route
    /// namespace and as the default registry key for adapters pointed at
    /// this simulator.
    fn id(&self) -> &'static str;

    /// REST path this plugin's klines endpoint is mounted at, e.g.
    /// `"/api/v3/klines"`.
    fn rest_path(&self) -> &'static str;

    /// WebSocket path this plugin's stream endpoint is mounted at.
    fn ws_path(&self) -> &'static str;

    /// Parse an incoming REST query string's parameters into the
    /// normalized shape.
    fn parse_rest_query(&self, params: &std::collections::HashMap<String, String>) -> RestQuery;

    /// Format a slice of bars as this exchange's REST response body.
    fn format_rest_response(&self, bars: &[Bar]) -> Value;

    /// Format a single bar update as this exchange's WebSocket frame for
    /// `(pair, interval)`.
    fn format_ws_frame(&self, pair: &str, interval: &str, bar: &Bar) -> Value;

    /// Parse a client's subscribe/unsubscribe text frame into the
    /// (pair, interval) pairs it names, or `None` if the frame isn't a
    /// subscription control frame (e.g. a keep-alive pong).
    fn parse_subscription_frame(&self, frame: &Value) -> Option<Vec<(String, String)>>;

    /// Build the acknowledgement frame sent back after a successful
    /// subscribe.
    fn subscription_ack(&self, pair: &str, interval: &str) -> Value;

    /// Deterministic internal key identifying a (pair, interval)
    /// subscription, used as the subscriber map's key.
    fn subscription_key(&self, pair: &str, interval: &str) -> String {
        format!("{}:{}:{}", self.id(), pair, interval)
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit::default()
    }

    fn network_settings(&self) -> NetworkSettings {
        NetworkSettings::default()
    }
}
