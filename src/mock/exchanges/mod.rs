//! Per-exchange mock server plugins, one module per exchange, mirroring
//! the adapter layer's one-module-per-exchange collapse.

pub mod binance;
pub mod bybit;
