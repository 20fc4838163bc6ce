//! Streaming strategy: the state machine below, driven by a `select!`
//! loop over the frame stream, a keep-alive interval, a backoff timer,
//! and the stop channel. Beyond a bare receive loop, this adds
//! subscribe-on-connect, backfill-on-reconnect, and reconnect-with-backoff.

use std::time::{Duration, SystemTime};

use futures_util::StreamExt;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::adapter::{KeepAlive, RestParams};
use crate::network::WsFrame;

use super::StrategyContext;

const SUBSCRIBE_ACK_TIMEOUT: Duration = Duration::from_secs(10);
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connecting,
    Subscribing,
    Streaming,
    Backoff,
    Terminal,
}

pub(crate) async fn run(ctx: StrategyContext, mut stop_rx: oneshot::Receiver<()>) {
    let mut state = State::Connecting;
    let mut attempt: u32 = 0;

    'outer: loop {
        match state {
            State::Terminal => return,

            State::Backoff => {
                let delay = backoff_delay(attempt);
                debug!(pair = %ctx.pair, interval = %ctx.interval, ?delay, attempt, "backing off before reconnect");
                tokio::select! {
                    _ = &mut stop_rx => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
                state = State::Connecting;
            }

            State::Connecting => {
                let opened = tokio::select! {
                    _ = &mut stop_rx => return,
                    res = ctx.network.ws_connect(ctx.adapter.ws_url()) => res,
                };
                match opened {
                    Ok((mut sink, mut stream)) => {
                        let payload = ctx
                            .adapter
                            .ws_subscribe_payload(&ctx.pair, &ctx.interval)
                            .to_string();
                        if sink.send_text(payload).await.is_err() {
                            state = State::Backoff;
                            continue 'outer;
                        }
                        // Backfill-on-reconnect: close any gap opened while
                        // disconnected before declaring ourselves streaming.
                        backfill(&ctx).await;

                        match wait_for_streaming(&ctx, &mut stream, &mut stop_rx).await {
                            SubscribeOutcome::Streaming => {
                                attempt = 0;
                                state = State::Streaming;
                                stream_loop(&ctx, &mut sink, &mut stream, &mut stop_rx).await;
                                let _ = sink.close().await;
                                state = State::Backoff;
                            }
                            SubscribeOutcome::TimedOut => {
                                let _ = sink.close().await;
                                state = State::Backoff;
                            }
                            SubscribeOutcome::Stopped => return,
                        }
                    }
                    Err(e) => {
                        warn!(pair = %ctx.pair, interval = %ctx.interval, error = %e, "websocket open failed");
                        state = State::Backoff;
                    }
                }
            }

            // Streaming is handled inline above; Subscribing is folded into
            // `wait_for_streaming`. These arms are unreachable but kept so
            // the enum documents every state this machine passes through.
            State::Subscribing | State::Streaming => unreachable!(),
        }
    }
}

enum SubscribeOutcome {
    Streaming,
    TimedOut,
    Stopped,
}

async fn wait_for_streaming(
    ctx: &StrategyContext,
    stream: &mut crate::network::WsStream,
    stop_rx: &mut oneshot::Receiver<()>,
) -> SubscribeOutcome {
    let deadline = tokio::time::sleep(SUBSCRIBE_ACK_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut *stop_rx => return SubscribeOutcome::Stopped,
            _ = &mut deadline => return SubscribeOutcome::TimedOut,
            frame = stream.next() => {
                match frame {
                    Some(Ok(WsFrame::Text(text))) => {
                        // Any text frame (ack or first data frame) confirms
                        // the subscription landed, whether or not it parsed
                        // to a bar.
                        offer_frame(ctx, &text).await;
                        return SubscribeOutcome::Streaming;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(_)) | None => return SubscribeOutcome::TimedOut,
                }
            }
        }
    }
}

async fn stream_loop(
    ctx: &StrategyContext,
    sink: &mut crate::network::WsSink,
    stream: &mut crate::network::WsStream,
    stop_rx: &mut oneshot::Receiver<()>,
) {
    let keep_alive = ctx.adapter.keep_alive();
    let mut ticker = match keep_alive {
        KeepAlive::None => None,
        KeepAlive::PingText { interval_seconds }
        | KeepAlive::PongText { interval_seconds }
        | KeepAlive::ProtocolPing { interval_seconds } => {
            Some(tokio::time::interval(Duration::from_secs(interval_seconds)))
        }
    };

    loop {
        tokio::select! {
            _ = &mut *stop_rx => return,

            frame = stream.next() => {
                match frame {
                    Some(Ok(WsFrame::Text(text))) => {
                        offer_frame(ctx, &text).await;
                    }
                    Some(Ok(WsFrame::Ping)) => {
                        if sink.send_pong().await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(WsFrame::Pong)) | Some(Ok(WsFrame::Binary(_))) => {}
                    Some(Ok(WsFrame::Close)) | None => {
                        debug!(pair = %ctx.pair, interval = %ctx.interval, "websocket closed");
                        return;
                    }
                    Some(Err(e)) => {
                        error!(pair = %ctx.pair, interval = %ctx.interval, error = %e, "transport error on stream");
                        return;
                    }
                }
            }

            _ = async {
                match ticker.as_mut() {
                    Some(t) => { t.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                let sent = match keep_alive {
                    KeepAlive::PingText { .. } => sink.send_text("ping".to_string()).await,
                    KeepAlive::PongText { .. } => sink.send_text("pong".to_string()).await,
                    KeepAlive::ProtocolPing { .. } => sink.send_ping().await,
                    KeepAlive::None => Ok(()),
                };
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

/// Parse `text` with the adapter and offer any bars found to the store.
/// Returns `true` if at least one bar was parsed from this frame (shape
/// errors and non-bar frames are logged/ignored, never fatal).
async fn offer_frame(ctx: &StrategyContext, text: &str) -> bool {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(pair = %ctx.pair, interval = %ctx.interval, error = %e, "non-JSON websocket frame");
            return false;
        }
    };
    match ctx.adapter.parse_ws(&value) {
        Ok(Some(bars)) => {
            let mut store = ctx.store.lock().await;
            let mut any = false;
            for bar in bars {
                if store.offer(bar) {
                    any = true;
                }
            }
            any
        }
        Ok(None) => false,
        Err(e) => {
            warn!(pair = %ctx.pair, interval = %ctx.interval, error = %e, "shape error parsing websocket frame");
            false
        }
    }
}

/// Fetch `[last_bar_open_time, now]` (or a default window if the store is
/// empty) and offer the results, closing any gap opened by the disconnect.
async fn backfill(ctx: &StrategyContext) {
    let (start, interval_seconds) = {
        let store = ctx.store.lock().await;
        (store.newest().map(|b| b.open_time), store.interval_seconds())
    };
    let start = start.unwrap_or_else(|| {
        crate::time_utils::now_seconds() - interval_seconds * ctx.fetch_limit as i64
    });

    let params = RestParams {
        pair: ctx.pair.clone(),
        interval: ctx.interval.clone(),
        start_time: Some(start),
        end_time: None,
        limit: Some(ctx.fetch_limit),
    };
    match ctx.adapter.fetch_history(ctx.network.as_ref(), &params).await {
        Ok(bars) => {
            let mut store = ctx.store.lock().await;
            for bar in bars {
                store.offer(bar);
            }
        }
        Err(e) => {
            warn!(pair = %ctx.pair, interval = %ctx.interval, error = %e, "backfill-on-reconnect failed");
        }
    }
}

/// `min(cap, base * 2^attempt)` with up to 20% jitter, without adding a
/// dependency on a random number generator: the low bits of the system
/// clock are good enough to desynchronize reconnecting clients.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX));
    let capped = exp.min(BACKOFF_CAP);
    let jitter_nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let jitter_fraction = (jitter_nanos % 1000) as f64 / 1000.0 * 0.2;
    capped.mul_f64(1.0 + jitter_fraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::Mutex;
    use tracing_test::traced_test;

    use crate::adapter::binance::BinanceAdapter;
    use crate::adapter::AdapterUrls;
    use crate::network::DefaultNetworkClient;
    use crate::store::BarStore;

    #[test]
    fn backoff_grows_and_is_capped() {
        assert!(backoff_delay(0) >= BACKOFF_BASE);
        assert!(backoff_delay(10) <= BACKOFF_CAP.mul_f64(1.2));
        assert!(backoff_delay(3) > backoff_delay(0));
    }

    fn test_ctx() -> StrategyContext {
        StrategyContext {
            adapter: Arc::new(BinanceAdapter::spot_with_urls(AdapterUrls {
                rest: "http://127.0.0.1:1/rest".to_string(),
                ws: "ws://127.0.0.1:1/ws".to_string(),
            })),
            network: Arc::new(DefaultNetworkClient::new()),
            store: Arc::new(Mutex::new(BarStore::new(60, 10))),
            pair: "BTC-USDT".to_string(),
            interval: "1m".to_string(),
            fetch_limit: 500,
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn offer_frame_accepts_a_well_formed_kline() {
        let ctx = test_ctx();
        let text = serde_json::json!({
            "e": "kline",
            "k": {
                "t": 1_700_000_000_000_i64, "o": "100.0", "h": "110.0", "l": "90.0", "c": "105.0",
                "v": "12.5", "q": "1300.0", "n": 42, "V": "6.0", "Q": "650.0"
            }
        })
        .to_string();

        assert!(offer_frame(&ctx, &text).await);
        assert_eq!(ctx.store.lock().await.snapshot().len(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn offer_frame_is_false_on_malformed_json() {
        let ctx = test_ctx();
        assert!(!offer_frame(&ctx, "not json").await);
        assert!(ctx.store.lock().await.snapshot().is_empty());
    }
}
