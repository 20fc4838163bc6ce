//! `FeedController`: the façade owning one window and orchestrating its
//! data sources. Construction takes its collaborators (URL, transport) as
//! parameters rather than reading globals; the store is wrapped the
//! minimal idiomatic way for a value read by callers and written by one
//! background task: an `Arc<tokio::sync::Mutex<BarStore>>`.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::adapter::ExchangeAdapter;
use crate::bar::Bar;
use crate::error::{Error, Result};
use crate::network::{DefaultNetworkClient, NetworkClient};
use crate::store::BarStore;
use crate::strategy::{self, StrategyContext, StrategyHandle, StrategyKind};
use crate::table::BarTable;

/// Upper bound on a single REST fetch, used both by the polling loop's
/// recurring tick and by backfill-on-reconnect. Conservative default well
/// under exchanges' own maximums (Binance/Bybit both cap at 1000).
const DEFAULT_FETCH_LIMIT: u32 = 500;

/// Owns a single (adapter, pair, interval) window: the bounded store, the
/// adapter, the transport, and at most one running strategy.
pub struct FeedController {
    adapter: Arc<dyn ExchangeAdapter>,
    network: Arc<dyn NetworkClient>,
    store: Arc<Mutex<BarStore>>,
    pair: String,
    interval: String,
    fetch_limit: u32,
    running: Option<StrategyHandle>,
}

impl FeedController {
    /// Construct a controller for `pair`/`interval` against `adapter`,
    /// holding up to `capacity` bars. Validates that `interval` is one the
    /// adapter's REST side supports, and that `capacity` is positive —
    /// both misuse-class, raised synchronously.
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, pair: &str, interval: &str, capacity: usize) -> Result<Self> {
        Self::with_network(adapter, pair, interval, capacity, Arc::new(DefaultNetworkClient::new()))
    }

    /// Same as [`Self::new`], but with an injected transport — the seam a
    /// host process uses to supply its own HTTP/WS stack, or a test uses
    /// to point at the mock server's [`crate::network::NetworkClient`]
    /// wiring (most tests instead just inject mock URLs into the adapter
    /// and use the default transport against a local mock server).
    pub fn with_network(
        adapter: Arc<dyn ExchangeAdapter>,
        pair: &str,
        interval: &str,
        capacity: usize,
        network: Arc<dyn NetworkClient>,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Misuse("capacity must be positive".into()));
        }
        let interval_seconds = *adapter.supported_intervals().get(interval).ok_or_else(|| {
            Error::Misuse(format!("interval {interval} is not supported by {}", adapter.exchange_id()))
        })?;

        Ok(Self {
            adapter,
            network,
            store: Arc::new(Mutex::new(BarStore::new(interval_seconds, capacity))),
            pair: pair.to_string(),
            interval: interval.to_string(),
            fetch_limit: DEFAULT_FETCH_LIMIT,
            running: None,
        })
    }

    /// Start the given strategy. Idempotent if already running the same
    /// (resolved) strategy; an error if running a different one.
    pub async fn start(&mut self, kind: StrategyKind) -> Result<()> {
        let resolved = kind.resolve(self.adapter.as_ref(), &self.interval);

        if let Some(running) = &self.running {
            return if running.kind() == resolved {
                Ok(())
            } else {
                Err(Error::Misuse(format!(
                    "already running {:?}, cannot start {:?}",
                    running.kind(),
                    resolved
                )))
            };
        }

        let ctx = StrategyContext {
            adapter: self.adapter.clone(),
            network: self.network.clone(),
            store: self.store.clone(),
            pair: self.pair.clone(),
            interval: self.interval.clone(),
            fetch_limit: self.fetch_limit,
        };
        self.running = Some(strategy::spawn(resolved, ctx)?);
        Ok(())
    }

    /// Stop the running strategy, if any. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(mut handle) = self.running.take() {
            handle.stop().await;
        }
    }

    /// One-shot historical fetch, independent of whether a strategy is
    /// running. Returns the bars fetched (not necessarily all newly
    /// inserted — some may already have been present). Routes through the
    /// same fetch-and-offer path the polling strategy's recurring tick
    /// uses, against a throwaway context sharing this controller's store.
    pub async fn fetch_history(&self, start: Option<i64>, end: Option<i64>, limit: Option<u32>) -> Result<Vec<Bar>> {
        let ctx = StrategyContext {
            adapter: self.adapter.clone(),
            network: self.network.clone(),
            store: self.store.clone(),
            pair: self.pair.clone(),
            interval: self.interval.clone(),
            fetch_limit: self.fetch_limit,
        };
        strategy::polling::fetch_and_offer(&ctx, start, end, limit).await
    }

    pub async fn bars(&self) -> Vec<Bar> {
        self.store.lock().await.snapshot()
    }

    pub async fn table(&self) -> BarTable {
        self.store.lock().await.as_table()
    }

    pub async fn gap_free(&self) -> bool {
        self.store.lock().await.sorted_and_equidistant()
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    pub fn interval(&self) -> &str {
        &self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{binance::BinanceAdapter, AdapterUrls};

    fn test_adapter() -> Arc<dyn ExchangeAdapter> {
        Arc::new(BinanceAdapter::spot_with_urls(AdapterUrls {
            rest: "http://127.0.0.1:1/rest".to_string(),
            ws: "ws://127.0.0.1:1/ws".to_string(),
        }))
    }

    #[tokio::test]
    async fn rejects_unsupported_interval() {
        let err = FeedController::new(test_adapter(), "BTC-USDT", "7m", 10).unwrap_err();
        assert!(matches!(err, Error::Misuse(_)));
    }

    #[tokio::test]
    async fn rejects_zero_capacity() {
        let err = FeedController::new(test_adapter(), "BTC-USDT", "1m", 0).unwrap_err();
        assert!(matches!(err, Error::Misuse(_)));
    }

    #[tokio::test]
    async fn starting_same_strategy_twice_is_idempotent() {
        let mut controller = FeedController::new(test_adapter(), "BTC-USDT", "1m", 10).unwrap();
        controller.start(StrategyKind::Polling).await.unwrap();
        controller.start(StrategyKind::Polling).await.unwrap();
        controller.stop().await;
    }

    #[tokio::test]
    async fn starting_a_different_strategy_while_running_errors() {
        let mut controller = FeedController::new(test_adapter(), "BTC-USDT", "1m", 10).unwrap();
        controller.start(StrategyKind::Polling).await.unwrap();
        let err = controller.start(StrategyKind::Websocket).await.unwrap_err();
        assert!(matches!(err, Error::Misuse(_)));
        controller.stop().await;
    }

    #[tokio::test]
    async fn empty_store_reports_gap_free_and_empty_bars() {
        let controller = FeedController::new(test_adapter(), "BTC-USDT", "1m", 10).unwrap();
        assert!(controller.gap_free().await);
        assert!(controller.bars().await.is_empty());
    }
}
