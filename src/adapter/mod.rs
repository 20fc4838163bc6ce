//! The adapter contract: the capability set an exchange-specific module
//! provides to normalize wire formats into canonical [`Bar`]s.

pub mod binance;
pub mod bybit;

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::bar::{Bar, TimestampUnit};
use crate::error::Result;

/// Maps canonical interval names (`"1m"`, `"1h"`, ...) to their duration
/// in seconds for one exchange.
pub type IntervalTable = HashMap<&'static str, i64>;

/// Which calling convention a historical-fetch implementation uses. A
/// polling strategy dispatches a `Sync` fetch on a worker thread and
/// awaits an `Async` fetch directly. Exactly one applies per adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Async,
    Sync,
}

/// Spot vs. perpetual/linear market. Adapters that serve both markets for
/// one exchange share one trait implementation parameterized by this
/// field rather than duplicating modules, per the one-module-per-exchange
/// collapse mandated for this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketKind {
    Spot,
    Perpetual,
}

/// REST and WebSocket base URLs an adapter talks to. Injectable at
/// construction time so tests can point an adapter at the mock server
/// without mutating any global state.
#[derive(Debug, Clone)]
pub struct AdapterUrls {
    pub rest: String,
    pub ws: String,
}

/// Adapter-chosen keep-alive shape for the WebSocket connection. `None`
/// means the strategy sends nothing and relies on the transport.
#[derive(Debug, Clone)]
pub enum KeepAlive {
    None,
    /// Send a text `"ping"` frame on this interval.
    PingText { interval_seconds: u64 },
    /// Send a text `"pong"` frame on this interval (some exchanges expect
    /// the client to originate pongs unprompted).
    PongText { interval_seconds: u64 },
    /// Send a protocol-level WebSocket ping frame on this interval.
    ProtocolPing { interval_seconds: u64 },
}

/// Parameters for a historical REST fetch, already normalized to the
/// adapter's canonical shape; `rest_params` turns this into the exchange's
/// own query parameters.
#[derive(Debug, Clone)]
pub struct RestParams {
    pub pair: String,
    pub interval: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub limit: Option<u32>,
}

/// The capability set an exchange-specific module provides. Bound to a
/// single (exchange, market) pair, e.g. "binance spot" and "binance
/// perpetual" are two distinct `ExchangeAdapter` values sharing one
/// struct/impl.
#[async_trait::async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Stable identifier, e.g. `"binance"`, used as the registry key
    /// together with the market kind.
    fn exchange_id(&self) -> &'static str;

    fn market_kind(&self) -> MarketKind;

    /// Exactly one of `fetches_async`/`fetches_sync` is true; expressed
    /// here as a single mode.
    fn fetch_mode(&self) -> FetchMode {
        FetchMode::Async
    }

    /// Canonical "BASE-QUOTE" to this exchange's wire symbol, e.g.
    /// `"BTC-USDT"` -> `"BTCUSDT"`.
    fn format_pair(&self, pair: &str) -> String {
        pair.replace('-', "")
    }

    fn rest_url(&self) -> &str;
    fn ws_url(&self) -> &str;

    fn supported_intervals(&self) -> &IntervalTable;

    /// Subset of `supported_intervals` that streaming covers; streaming
    /// may cover fewer than REST.
    fn ws_supported_intervals(&self) -> &HashSet<&'static str>;

    fn timestamp_unit(&self) -> TimestampUnit;

    fn keep_alive(&self) -> KeepAlive {
        KeepAlive::None
    }

    /// Build the exchange's own REST query parameters for a historical
    /// fetch, encoding timestamps in this adapter's declared unit.
    fn rest_params(&self, params: &RestParams) -> Vec<(String, String)>;

    /// Parse a decoded REST JSON body (may be `Null`, an object, or an
    /// array) into bars. Empty sequence on null/empty.
    fn parse_rest(&self, payload: &Value) -> Result<Vec<Bar>>;

    /// Build the subscription payload sent once on WebSocket connect.
    fn ws_subscribe_payload(&self, pair: &str, interval: &str) -> Value;

    /// Parse a decoded WebSocket frame. `Ok(None)` means the frame is not
    /// a bar update (ack, heartbeat, another channel) — not an error.
    fn parse_ws(&self, frame: &Value) -> Result<Option<Vec<Bar>>>;

    /// Perform a historical REST fetch against this adapter's configured
    /// `rest_url`, using the given HTTP client.
    async fn fetch_history(
        &self,
        client: &dyn crate::network::NetworkClient,
        params: &RestParams,
    ) -> Result<Vec<Bar>> {
        let query = self.rest_params(params);
        let payload = client.get_json(self.rest_url(), &query).await?;
        self.parse_rest(&payload)
    }
}
