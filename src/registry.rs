//! Process-wide directory mapping an exchange name to a constructor for
//! its adapter. Favors explicit, injectable state over ambient globals:
//! the registry itself is a lazily initialized, mutex-guarded map, but
//! nothing here reaches for an adapter implicitly — callers always look
//! one up by name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::adapter::{binance::BinanceAdapter, bybit::BybitAdapter, AdapterUrls, ExchangeAdapter};
use crate::error::{Error, Result};

/// Builds one adapter instance for a given set of URLs. Registered once
/// per (exchange, market) key; invoked fresh for every `get`, since
/// adapters are cheap, stateless, `Send + Sync` values.
pub type AdapterFactory = Box<dyn Fn(AdapterUrls) -> Arc<dyn ExchangeAdapter> + Send + Sync>;

fn registry() -> &'static Mutex<HashMap<String, AdapterFactory>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, AdapterFactory>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(default_factories()))
}

fn default_factories() -> HashMap<String, AdapterFactory> {
    let mut m: HashMap<String, AdapterFactory> = HashMap::new();
    m.insert(
        "binance_spot".to_string(),
        Box::new(|urls| Arc::new(BinanceAdapter::spot_with_urls(urls))),
    );
    m.insert(
        "binance_perpetual".to_string(),
        Box::new(|urls| Arc::new(BinanceAdapter::perpetual_with_urls(urls))),
    );
    m.insert(
        "bybit_spot".to_string(),
        Box::new(|urls| Arc::new(BybitAdapter::spot_with_urls(urls))),
    );
    m.insert(
        "bybit_perpetual".to_string(),
        Box::new(|urls| Arc::new(BybitAdapter::perpetual_with_urls(urls))),
    );
    m
}

/// The canonical key for an (exchange, market) pair, e.g.
/// `("binance", Spot) -> "binance_spot"`.
pub fn registry_key(exchange: &str, market: crate::adapter::MarketKind) -> String {
    let suffix = match market {
        crate::adapter::MarketKind::Spot => "spot",
        crate::adapter::MarketKind::Perpetual => "perpetual",
    };
    format!("{exchange}_{suffix}")
}

/// Register the factory for `key`. Intended for tests wiring a synthetic
/// adapter, or a host process adding an exchange this crate doesn't ship.
/// `Error::Misuse` if `key` is already registered — registering over an
/// existing key is a caller error, not a silent replacement.
pub fn register(key: impl Into<String>, factory: AdapterFactory) -> Result<()> {
    let key = key.into();
    let mut guard = registry().lock().expect("registry mutex poisoned");
    if guard.contains_key(&key) {
        return Err(Error::Misuse(format!("{key} is already registered")));
    }
    guard.insert(key, factory);
    Ok(())
}

/// Construct the adapter registered under `key`, pointed at `urls`.
/// `Error::Misuse` if no factory is registered under that key.
pub fn get(key: &str, urls: AdapterUrls) -> Result<Arc<dyn ExchangeAdapter>> {
    let guard = registry().lock().expect("registry mutex poisoned");
    match guard.get(key) {
        Some(factory) => Ok(factory(urls)),
        None => Err(Error::Misuse(format!("no adapter registered for {key}"))),
    }
}

/// All keys currently registered, for diagnostics and tests.
pub fn registered_keys() -> Vec<String> {
    registry().lock().expect("registry mutex poisoned").keys().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MarketKind;

    fn test_urls() -> AdapterUrls {
        AdapterUrls {
            rest: "http://localhost:0/rest".to_string(),
            ws: "ws://localhost:0/ws".to_string(),
        }
    }

    #[test]
    fn default_factories_cover_both_exchanges_and_markets() {
        for key in [
            "binance_spot",
            "binance_perpetual",
            "bybit_spot",
            "bybit_perpetual",
        ] {
            let adapter = get(key, test_urls()).unwrap();
            assert_eq!(registry_key(adapter.exchange_id(), adapter.market_kind()), key);
        }
    }

    #[test]
    fn unknown_key_is_misuse() {
        let err = get("nonexistent", test_urls()).unwrap_err();
        assert!(matches!(err, Error::Misuse(_)));
    }

    #[test]
    fn registry_key_matches_spot_and_perpetual_suffixes() {
        assert_eq!(registry_key("binance", MarketKind::Spot), "binance_spot");
        assert_eq!(registry_key("bybit", MarketKind::Perpetual), "bybit_perpetual");
    }

    #[test]
    fn duplicate_registration_is_misuse() {
        let err = register(
            "binance_spot",
            Box::new(|urls| Arc::new(BinanceAdapter::spot_with_urls(urls))),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Misuse(_)));
    }

    #[test]
    fn a_fresh_key_registers_successfully() {
        register(
            "test_only_synthetic_exchange",
            Box::new(|urls| Arc::new(BinanceAdapter::spot_with_urls(urls))),
        )
        .unwrap();
        assert!(registered_keys().contains(&"test_only_synthetic_exchange".to_string()));
    }
}
