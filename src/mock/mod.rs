//! The mock exchange simulator: not a toy REST stub but a
//! protocol-emulating HTTP + WebSocket server exercising the full
//! strategy state machine under controlled network conditions.

pub mod candle_factory;
pub mod exchanges;
pub mod harness;
pub mod plugin;
pub mod server;

pub use harness::mock_adapter_urls;
pub use plugin::ExchangePlugin;
pub use server::{MockServer, NetworkConditions, RunningServer};
