//! Because adapter URLs are constructor-injected, redirecting an adapter
//! at the simulator needs no global mutation: this just builds the
//! `AdapterUrls` value from the simulator's bound address and the
//! plugin's own paths.

use crate::adapter::AdapterUrls;
use crate::mock::plugin::ExchangePlugin;

/// Build the `AdapterUrls` an adapter should be constructed with to talk
/// to `plugin` running on the simulator bound at `host:port`.
pub fn mock_adapter_urls(host: &str, port: u16, plugin: &dyn ExchangePlugin) -> AdapterUrls {
    AdapterUrls {
        rest: format!("http://{host}:{port}{}", plugin.rest_path()),
        ws: format!("ws://{host}:{port}{}", plugin.ws_path()),
    }
}
