//! The generic mock exchange server: hosts one REST route and one
//! WebSocket route per registered plugin, a background per-second candle
//! generator, and a uniform handler envelope (simulated network
//! conditions, then a per-IP rate-limit check) wrapping every request.
//!
//! State layout mirrors the shape of `candles`, `subscriptions`,
//! `trading_pairs`, and `request_counts` a reference candle-mocking
//! server keeps. Axum dispatches handlers onto a thread pool rather than
//! a single-threaded event loop, so every one of these is `Mutex`-guarded
//! here instead.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as AxMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::bar::Bar;
use crate::mock::candle_factory;
use crate::mock::plugin::ExchangePlugin;

const DEFAULT_HISTORY_LEN: usize = 200;
const RETENTION_CAP: usize = 1000;

/// Canonical "BASE-QUOTE" to wire symbol, mirroring `ExchangeAdapter`'s
/// default `format_pair` so a pair registered either way lands under the
/// same `trading_pairs` key that request handlers look it up by.
fn normalize_pair(pair: &str) -> String {
    pair.replace('-', "")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkConditions {
    pub latency_ms: u64,
    pub packet_loss: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Copy)]
struct BroadcastMsg {
    plugin_id: &'static str,
    pair: String,
    interval: String,
    bar: Bar,
}

struct RateLimiter {
    window: Duration,
    max_weight: u32,
    hits: Mutex<HashMap<SocketAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    fn new(max_weight: u32, window: Duration) -> Self {
        Self {
            window,
            max_weight,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request of `weight` from `addr`; `false` if this request
    /// pushes the sliding window over budget.
    fn check(&self, addr: SocketAddr, weight: u32) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock().expect("rate limiter mutex poisoned");
        let entry = hits.entry(addr).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) > self.window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() as u32 + weight > self.max_weight {
            return false;
        }
        for _ in 0..weight {
            entry.push_back(now);
        }
        true
    }
}

struct AppState {
    plugins: HashMap<String, Arc<dyn ExchangePlugin>>,
    candles: Mutex<HashMap<(String, String, String), VecDeque<Bar>>>,
    trading_pairs: Mutex<HashMap<String, f64>>,
    rate_limiters: HashMap<String, RateLimiter>,
    conditions: Mutex<NetworkConditions>,
    seed: AtomicU64,
    tick_rng: Mutex<rand::rngs::StdRng>,
    broadcast_tx: broadcast::Sender<BroadcastMsg>,
}

impl AppState {
    fn candle_key(plugin_id: &str, pair: &str, interval: &str) -> (String, String, String) {
        (plugin_id.to_string(), pair.to_string(), interval.to_string())
    }

    fn next_seed(&self) -> u64 {
        self.seed.fetch_add(0x9E3779B97F4A7C15, Ordering::Relaxed)
    }

    fn ensure_series(&self, plugin_id: &str, pair: &str, interval: &str, interval_seconds: i64) {
        let key = Self::candle_key(plugin_id, pair, interval);
        let mut candles = self.candles.lock().expect("candles mutex poisoned");
        if candles.contains_key(&key) {
            return;
        }
        let anchor = *self
            .trading_pairs
            .lock()
            .expect("trading_pairs mutex poisoned")
            .get(pair)
            .unwrap_or(&100.0);
        let now = crate::time_utils::round_down(crate::time_utils::now_seconds(), interval_seconds);
        let seed = self.next_seed();
        let bars = candle_factory::create_market_simulation(now, interval_seconds, anchor, DEFAULT_HISTORY_LEN, seed);
        candles.insert(key, bars.into_iter().collect());
    }
}

/// The mock exchange simulator: a set of registered plugins sharing one
/// `AppState`, served over HTTP + WebSocket, plus a background task that
/// advances every registered (pair, interval) series once a second.
pub struct MockServer {
    state: Arc<AppState>,
}

/// A running server instance: its bound address and the handles needed to
/// tear it down.
pub struct RunningServer {
    pub local_addr: SocketAddr,
    server_task: tokio::task::JoinHandle<()>,
    generator_task: tokio::task::JoinHandle<()>,
}

impl RunningServer {
    pub async fn shutdown(self) {
        self.server_task.abort();
        self.generator_task.abort();
    }
}

impl MockServer {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            state: Arc::new(AppState {
                plugins: HashMap::new(),
                candles: Mutex::new(HashMap::new()),
                trading_pairs: Mutex::new(HashMap::new()),
                rate_limiters: HashMap::new(),
                conditions: Mutex::new(NetworkConditions::default()),
                seed: AtomicU64::new(0xA5A5_1234_5678_9ABC),
                tick_rng: Mutex::new(rand::SeedableRng::seed_from_u64(0xC0FF_EE00_D15E_A5E5)),
                broadcast_tx,
            }),
        }
    }

    /// Register a plugin. Panics on a duplicate id — this mirrors the
    /// registry's misuse-class duplicate-registration error, but happens
    /// at server-construction time (a programming error, not a runtime
    /// condition callers recover from).
    pub fn register_plugin(mut self, plugin: Arc<dyn ExchangePlugin>) -> Self {
        let state = Arc::get_mut(&mut self.state).expect("register_plugin called after serve()");
        let id = plugin.id();
        if state.plugins.contains_key(id) {
            panic!("duplicate plugin registration for {id}");
        }
        state
            .rate_limiters
            .insert(id.to_string(), RateLimiter::new(plugin.rate_limit().max_weight, plugin.rate_limit().window));
        state.plugins.insert(id.to_string(), plugin);
        self
    }

    /// A server with the Binance and Bybit spot/perpetual plugins this
    /// crate ships already registered — the common case for tests driving
    /// the bundled adapters end to end.
    pub fn with_default_plugins() -> Self {
        use crate::mock::exchanges::{binance::BinancePlugin, bybit::BybitPlugin};
        Self::new()
            .register_plugin(Arc::new(BinancePlugin::spot()))
            .register_plugin(Arc::new(BinancePlugin::perpetual()))
            .register_plugin(Arc::new(BybitPlugin::spot()))
            .register_plugin(Arc::new(BybitPlugin::perpetual()))
    }

    /// The plugin registered under `id`, if any — used by the harness to
    /// build `AdapterUrls` without the caller needing to reconstruct a
    /// plugin instance itself.
    pub fn plugin(&self, id: &str) -> Option<Arc<dyn ExchangePlugin>> {
        self.state.plugins.get(id).cloned()
    }

    /// Register a trading pair with its anchor price, used to seed and
    /// bound generated series for every interval requested against it.
    /// `pair` is accepted in either canonical (`"BTC-USDT"`) or wire
    /// (`"BTCUSDT"`) form and stored under the wire form, since that's
    /// what every request handler looks it up by (the adapter's own
    /// `format_pair` strips the hyphen before the symbol ever reaches
    /// this server).
    pub fn register_pair(&self, pair: &str, anchor_price: f64) {
        self.state
            .trading_pairs
            .lock()
            .expect("trading_pairs mutex poisoned")
            .insert(normalize_pair(pair), anchor_price);
    }

    pub fn set_network_conditions(&self, conditions: NetworkConditions) {
        *self.state.conditions.lock().expect("conditions mutex poisoned") = conditions;
    }

    /// Append `count` bars forming a consistent trend to an already
    /// (or newly) generating `(pair, interval)` series, continuing from
    /// its current last bar, and broadcast each to subscribers. Lets a
    /// scenario test force a directional move instead of waiting for one
    /// to emerge from the background random walk.
    pub fn inject_trend(
        &self,
        plugin_id: &'static str,
        pair: &str,
        interval: &str,
        count: usize,
        drift_per_bar: f64,
    ) {
        let bars = self.extend_series(plugin_id, pair, interval, |last, interval_seconds, anchor, rng| {
            candle_factory::create_trending_series(
                last.open_time + interval_seconds,
                interval_seconds,
                anchor,
                count,
                drift_per_bar,
                rng,
            )
        });
        for bar in bars {
            broadcast_candle_update(&self.state, plugin_id, pair.to_string(), interval.to_string(), bar);
        }
    }

    /// Apply a single discontinuous price jump to an already (or newly)
    /// generating `(pair, interval)` series and broadcast it, for
    /// scenario tests exercising a sudden move rather than a gradual one.
    pub fn inject_price_event(&self, plugin_id: &'static str, pair: &str, interval: &str, magnitude: f64) {
        let bars = self.extend_series(plugin_id, pair, interval, |last, interval_seconds, anchor, _rng| {
            vec![candle_factory::create_price_event(
                last.open_time + interval_seconds,
                anchor,
                last,
                magnitude,
            )]
        });
        for bar in bars {
            broadcast_candle_update(&self.state, plugin_id, pair.to_string(), interval.to_string(), bar);
        }
    }

    /// Shared plumbing for `inject_trend`/`inject_price_event`: ensure the
    /// series exists, look up its anchor and current tail, run `build` to
    /// produce the new bars, append them (respecting the retention cap),
    /// and return them for the caller to broadcast.
    fn extend_series(
        &self,
        plugin_id: &str,
        pair: &str,
        interval: &str,
        build: impl FnOnce(Bar, i64, f64, &mut rand::rngs::StdRng) -> Vec<Bar>,
    ) -> Vec<Bar> {
        let interval_seconds = crate::time_utils::canonical_interval_seconds(interval).unwrap_or(60);
        self.state.ensure_series(plugin_id, pair, interval, interval_seconds);

        let anchor = *self
            .state
            .trading_pairs
            .lock()
            .expect("trading_pairs mutex poisoned")
            .get(pair)
            .unwrap_or(&100.0);

        let key = AppState::candle_key(plugin_id, pair, interval);
        let mut candles = self.state.candles.lock().expect("candles mutex poisoned");
        let series = candles.get_mut(&key).expect("ensure_series just populated this key");
        let last = series
            .back()
            .copied()
            .unwrap_or_else(|| Bar::new(0, anchor, anchor, anchor, anchor, 0.0, 0.0, 0, 0.0, 0.0));

        let mut rng = self.state.tick_rng.lock().expect("tick_rng mutex poisoned");
        let bars = build(last, interval_seconds, anchor, &mut rng);
        drop(rng);

        for bar in &bars {
            series.push_back(*bar);
        }
        while series.len() > RETENTION_CAP {
            series.pop_front();
        }
        bars
    }

    fn router(&self) -> Router {
        let mut router = Router::new();
        for plugin in self.state.plugins.values().cloned() {
            let rest_path = plugin.rest_path();
            let ws_path = plugin.ws_path();
            let rest_plugin = plugin.clone();
            let ws_plugin = plugin.clone();
            router = router
                .route(
                    rest_path,
                    get(
                        move |state: State<Arc<AppState>>,
                              conn: ConnectInfo<SocketAddr>,
                              query: Query<HashMap<String, String>>| {
                            rest_handler(state, conn, query, rest_plugin.clone())
                        },
                    ),
                )
                .route(
                    ws_path,
                    get(move |ws: WebSocketUpgrade, state: State<Arc<AppState>>| {
                        ws_handler(ws, state, ws_plugin.clone())
                    }),
                );
        }
        router.with_state(self.state.clone())
    }

    /// Bind to `addr` (port 0 for an ephemeral port) and start serving,
    /// alongside the background candle generator.
    pub async fn serve(&self, addr: SocketAddr) -> std::io::Result<RunningServer> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();

        let server_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "mock server exited");
            }
        });

        let generator_state = self.state.clone();
        let generator_task = tokio::spawn(async move {
            generate_forever(generator_state).await;
        });

        Ok(RunningServer {
            local_addr,
            server_task,
            generator_task,
        })
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn apply_network_conditions(state: &AppState) -> Result<(), StatusCode> {
    let conditions = *state.conditions.lock().expect("conditions mutex poisoned");
    if conditions.latency_ms > 0 {
        tokio::time::sleep(Duration::from_millis(conditions.latency_ms)).await;
    }
    if conditions.packet_loss > 0.0 && rand::random::<f64>() < conditions.packet_loss {
        return Err(StatusCode::REQUEST_TIMEOUT);
    }
    if conditions.error_rate > 0.0 && rand::random::<f64>() < conditions.error_rate {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(())
}

async fn rest_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
    plugin: Arc<dyn ExchangePlugin>,
) -> Response {
    if let Err(status) = apply_network_conditions(&state).await {
        return status.into_response();
    }
    let limiter = &state.rate_limiters[plugin.id()];
    if !limiter.check(addr, 1) {
        return (StatusCode::TOO_MANY_REQUESTS, [("Retry-After", "1")]).into_response();
    }

    let query = plugin.parse_rest_query(&params);
    let interval_seconds = crate::time_utils::canonical_interval_seconds(&query.interval).unwrap_or(60);
    state.ensure_series(plugin.id(), &query.symbol, &query.interval, interval_seconds);

    let key = AppState::candle_key(plugin.id(), &query.symbol, &query.interval);
    let candles = state.candles.lock().expect("candles mutex poisoned");
    let series = candles.get(&key).cloned().unwrap_or_default();
    drop(candles);

    let filtered: Vec<Bar> = series
        .into_iter()
        .filter(|b| query.start_time.map_or(true, |s| b.open_time >= s))
        .filter(|b| query.end_time.map_or(true, |e| b.open_time <= e))
        .collect();
    let limit = query.limit.unwrap_or(500) as usize;
    let tail: Vec<Bar> = filtered.into_iter().rev().take(limit).rev().collect();

    Json(plugin.format_rest_response(&tail)).into_response()
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    plugin: Arc<dyn ExchangePlugin>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, plugin))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, plugin: Arc<dyn ExchangePlugin>) {
    let mut subscribed: HashMap<String, (String, String)> = HashMap::new();
    let mut rx = state.broadcast_tx.subscribe();
    let settings = plugin.network_settings();
    // A client that goes quiet for longer than twice its keep-alive
    // interval is treated as dead, mirroring a real exchange dropping
    // connections that stop pinging.
    let idle_timeout = settings.keep_alive_interval.saturating_mul(2);

    loop {
        tokio::select! {
            incoming = tokio::time::timeout(idle_timeout, socket.recv()) => {
                let Ok(incoming) = incoming else {
                    debug!(plugin = plugin.id(), "websocket idle timeout, closing");
                    return;
                };
                match incoming {
                    Some(Ok(AxMessage::Text(text))) => {
                        let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
                            continue;
                        };
                        if let Some(pairs) = plugin.parse_subscription_frame(&value) {
                            for (pair, interval) in pairs {
                                let interval_seconds = crate::time_utils::canonical_interval_seconds(&interval).unwrap_or(60);
                                state.ensure_series(plugin.id(), &pair, &interval, interval_seconds);
                                subscribed.insert(plugin.subscription_key(&pair, &interval), (pair.clone(), interval.clone()));

                                if settings.subscription_ack_required {
                                    let ack = plugin.subscription_ack(&pair, &interval);
                                    if socket.send(AxMessage::Text(ack.to_string())).await.is_err() {
                                        return;
                                    }
                                }

                                let key = AppState::candle_key(plugin.id(), &pair, &interval);
                                let last = state.candles.lock().expect("candles mutex poisoned")
                                    .get(&key).and_then(|c| c.back().copied());
                                if let Some(bar) = last {
                                    let frame = plugin.format_ws_frame(&pair, &interval, &bar);
                                    if socket.send(AxMessage::Text(frame.to_string())).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    Some(Ok(AxMessage::Ping(payload))) => {
                        if socket.send(AxMessage::Pong(payload)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(AxMessage::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket recv error");
                        return;
                    }
                }
            }

            update = rx.recv() => {
                match update {
                    Ok(msg) if msg.plugin_id == plugin.id()
                        && subscribed.contains_key(&plugin.subscription_key(&msg.pair, &msg.interval)) =>
                    {
                        let frame = plugin.format_ws_frame(&msg.pair, &msg.interval, &msg.bar);
                        if socket.send(AxMessage::Text(frame.to_string())).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}

/// Broadcast a freshly generated bar to every subscriber of
/// `(plugin_id, pair, interval)`. The single consistent name for this
/// fanout, resolving the source's naming inconsistency between
/// `_broadcast_candle_update` and `_push_candle_update`.
fn broadcast_candle_update(state: &AppState, plugin_id: &'static str, pair: String, interval: String, bar: Bar) {
    let _ = state.broadcast_tx.send(BroadcastMsg {
        plugin_id,
        pair,
        interval,
        bar,
    });
}

async fn generate_forever(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let due: Vec<(String, String, String, i64)> = {
            let candles = state.candles.lock().expect("candles mutex poisoned");
            candles
                .keys()
                .filter_map(|(plugin_id, pair, interval)| {
                    crate::time_utils::canonical_interval_seconds(interval)
                        .map(|secs| (plugin_id.clone(), pair.clone(), interval.clone(), secs))
                })
                .collect()
        };

        for (plugin_id, pair, interval, interval_seconds) in due {
            let Some(plugin) = state.plugins.get(&plugin_id).cloned() else {
                continue;
            };
            let key = AppState::candle_key(&plugin_id, &pair, &interval);
            let anchor = *state
                .trading_pairs
                .lock()
                .expect("trading_pairs mutex poisoned")
                .get(&pair)
                .unwrap_or(&100.0);
            let now = crate::time_utils::round_down(crate::time_utils::now_seconds(), interval_seconds);

            let mut candles = state.candles.lock().expect("candles mutex poisoned");
            let Some(series) = candles.get_mut(&key) else {
                continue;
            };
            let Some(last) = series.back().copied() else {
                continue;
            };
            let mut rng = state.tick_rng.lock().expect("tick_rng mutex poisoned");

            let updated = if now <= last.open_time {
                // Still inside the last bar's interval: this is a live tick
                // on the still-forming candle, not a new boundary.
                let ticked = candle_factory::tick_in_place(last, anchor, &mut rng);
                *series.back_mut().unwrap() = ticked;
                vec![ticked]
            } else {
                // One or more interval boundaries elapsed: finalize the
                // necessary number of new bars, each based on the previous.
                let elapsed = ((now - last.open_time) / interval_seconds).min(10);
                let mut previous = Some(last);
                let mut new_bars = Vec::with_capacity(elapsed as usize);
                for i in 1..=elapsed {
                    let open_time = last.open_time + interval_seconds * i;
                    let bar = candle_factory::create_random(open_time, anchor, previous, &mut rng);
                    previous = Some(bar);
                    new_bars.push(bar);
                }
                for bar in &new_bars {
                    series.push_back(*bar);
                }
                new_bars
            };

            while series.len() > RETENTION_CAP {
                series.pop_front();
            }
            drop(rng);
            drop(candles);

            for bar in updated {
                broadcast_candle_update(&state, plugin.id(), pair.clone(), interval.clone(), bar);
            }
        }
    }
}
