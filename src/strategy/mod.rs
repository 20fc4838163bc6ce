//! The two data-source strategies and the handle used to run/stop them.
//!
//! Each strategy is an ordinary `tokio` task reading from a shared
//! `Arc<Mutex<BarStore>>`; `stop()` is a `oneshot` signal the task selects
//! on alongside its I/O — a spawned task torn down by a stop signal,
//! rather than a cooperative-cancellation library.

pub mod polling;
pub mod streaming;

use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::adapter::ExchangeAdapter;
use crate::error::{Error, Result};
use crate::network::NetworkClient;
use crate::store::BarStore;

/// Which strategy a controller is (or should be) running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Polling,
    Websocket,
    /// Prefer streaming if the adapter's `ws_supported_intervals` covers
    /// the configured interval, else fall back to polling.
    Auto,
}

impl StrategyKind {
    /// Resolve `Auto` against an adapter's declared capabilities; `Polling`
    /// and `Websocket` resolve to themselves.
    pub fn resolve(self, adapter: &dyn ExchangeAdapter, interval: &str) -> StrategyKind {
        match self {
            StrategyKind::Auto => {
                if adapter.ws_supported_intervals().contains(interval) {
                    StrategyKind::Websocket
                } else {
                    StrategyKind::Polling
                }
            }
            other => other,
        }
    }
}

/// A running strategy task plus the means to stop it. Dropping the handle
/// without calling `stop()` leaves the task running (it is not tied to
/// the handle's lifetime) — callers are expected to call `stop().await`.
pub struct StrategyHandle {
    kind: StrategyKind,
    stop_tx: Option<oneshot::Sender<()>>,
    join: tokio::task::JoinHandle<()>,
}

impl StrategyHandle {
    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    /// Signal the task to stop and wait for it to exit. Idempotent: a
    /// second call is a no-op once the first has consumed the sender.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        // The task may already have exited on its own (e.g. Cancelled
        // propagated from a fatal misuse); awaiting a finished handle is
        // fine, it resolves immediately.
        let _ = (&mut self.join).await;
    }
}

/// Shared context every strategy needs: the adapter, the pair/interval
/// this task is responsible for, the store to write into, and the
/// transport to use.
pub(crate) struct StrategyContext {
    pub adapter: Arc<dyn ExchangeAdapter>,
    pub network: Arc<dyn NetworkClient>,
    pub store: Arc<Mutex<BarStore>>,
    pub pair: String,
    pub interval: String,
    pub fetch_limit: u32,
}

/// Spawn the strategy named by `kind` (must already be resolved, i.e. not
/// `Auto`) against `ctx`, returning a handle to stop it.
pub(crate) fn spawn(kind: StrategyKind, ctx: StrategyContext) -> Result<StrategyHandle> {
    let (stop_tx, stop_rx) = oneshot::channel();
    let join = match kind {
        StrategyKind::Polling => tokio::spawn(polling::run(ctx, stop_rx)),
        StrategyKind::Websocket => tokio::spawn(streaming::run(ctx, stop_rx)),
        StrategyKind::Auto => {
            return Err(Error::Misuse(
                "StrategyKind::Auto must be resolved before spawning".into(),
            ))
        }
    };
    Ok(StrategyHandle {
        kind,
        stop_tx: Some(stop_tx),
        join,
    })
}
