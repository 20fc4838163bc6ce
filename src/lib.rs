//! A unified, real-time OHLCV candlestick feed across heterogeneous
//! cryptocurrency exchanges.
//!
//! For each (exchange, market, trading pair, interval) tuple,
//! [`FeedController`] maintains an in-memory, time-ordered, gap-free
//! sliding window of the most recent bars, continuously refreshed from
//! REST polling and/or WebSocket streaming, and exposes it both as a
//! sequence of [`Bar`] records and as a columnar [`BarTable`].
//!
//! Out of scope: persistence across restarts, order books/trade tape,
//! authenticated channels, and exchange-specific correctness guarantees
//! beyond what each bundled adapter implements. See `DESIGN.md` for the
//! full list and the rationale behind this crate's structure.

pub mod adapter;
pub mod bar;
pub mod controller;
pub mod error;
pub mod network;
pub mod registry;
pub mod store;
pub mod strategy;
pub mod table;
pub mod time_utils;

#[cfg(feature = "mock-server")]
pub mod mock;

pub use adapter::{AdapterUrls, ExchangeAdapter, MarketKind};
pub use bar::Bar;
pub use controller::FeedController;
pub use error::{Error, Result};
pub use network::{DefaultNetworkClient, NetworkClient};
pub use store::BarStore;
pub use strategy::StrategyKind;
pub use table::BarTable;
