//! End-to-end scenarios (S1-S6) driven against the in-process mock
//! exchange simulator, exercising the real adapter, strategy, and store
//! code paths the way a host process would.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use candle_feed::adapter::binance::BinanceAdapter;
use candle_feed::mock::{mock_adapter_urls, MockServer, NetworkConditions, RunningServer};
use candle_feed::{FeedController, StrategyKind};

async fn start_server() -> (MockServer, RunningServer) {
    let server = MockServer::with_default_plugins();
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let running = server.serve(addr).await.expect("mock server failed to bind");
    (server, running)
}

fn binance_spot_adapter(server: &MockServer, running: &RunningServer) -> Arc<BinanceAdapter> {
    let plugin = server.plugin("binance_spot").expect("binance_spot plugin registered");
    let urls = mock_adapter_urls("127.0.0.1", running.local_addr.port(), plugin.as_ref());
    Arc::new(BinanceAdapter::spot_with_urls(urls))
}

/// S1: historical fetch via polling. The periodic poll tick and the
/// on-demand fetch share the same `fetch_history` code path; exercising
/// it directly keeps this test's runtime independent of the interval's
/// wall-clock boundary while covering exactly what a poll tick does.
#[tokio::test(flavor = "multi_thread")]
async fn s1_historical_fetch_via_polling() {
    let (server, running) = start_server().await;
    server.register_pair("BTC-USDT", 50_000.0);

    let adapter = binance_spot_adapter(&server, &running);
    let controller = FeedController::new(adapter, "BTC-USDT", "1m", 500).unwrap();

    let bars = controller.fetch_history(None, None, None).await.unwrap();
    assert!(!bars.is_empty());

    let now = candle_feed::time_utils::now_seconds();
    let newest = controller.bars().await.last().unwrap().open_time;
    assert!(now - newest < 120);

    running.shutdown().await;
}

/// S2: streaming receives updates. The mock server's background
/// generator ticks the still-forming trailing bar every second, so a
/// subscriber observes its `close` change within a few seconds of
/// steady state.
#[tokio::test(flavor = "multi_thread")]
async fn s2_streaming_receives_updates() {
    let (server, running) = start_server().await;
    server.register_pair("BTC-USDT", 50_000.0);

    let adapter = binance_spot_adapter(&server, &running);
    let mut controller = FeedController::new(adapter, "BTC-USDT", "1m", 500).unwrap();

    controller.start(StrategyKind::Websocket).await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    let first_close = controller.bars().await.last().map(|b| b.close);

    tokio::time::sleep(Duration::from_secs(4)).await;
    let second_close = controller.bars().await.last().map(|b| b.close);

    assert!(first_close.is_some());
    assert_ne!(first_close, second_close);

    controller.stop().await;
    running.shutdown().await;
}

/// S3: reconnection closes a gap. Cycling the server simulates a
/// disconnect; after it comes back and the strategy reconnects,
/// `gap_free()` holds and the newest bar is recent.
#[tokio::test(flavor = "multi_thread")]
async fn s3_reconnection_closes_a_gap() {
    let (server, running) = start_server().await;
    server.register_pair("BTC-USDT", 50_000.0);
    let port = running.local_addr.port();

    let adapter = binance_spot_adapter(&server, &running);
    let mut controller = FeedController::new(adapter, "BTC-USDT", "1m", 500).unwrap();
    controller.start(StrategyKind::Websocket).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    running.shutdown().await; // cycle the endpoint: drop the listener and generator

    tokio::time::sleep(Duration::from_secs(1)).await;

    // Re-bind on the same port so the strategy's next reconnect attempt
    // (driven by its own backoff timer) succeeds against a live endpoint.
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let running2 = server.serve(addr).await.expect("mock server failed to re-bind");

    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(controller.gap_free().await);
    let newest = controller.bars().await.last().map(|b| b.open_time);
    assert!(newest.is_some());

    controller.stop().await;
    running2.shutdown().await;
}

/// S4: multiple pairs isolate. Three independently-anchored pairs never
/// cross-contaminate each other's store.
#[tokio::test(flavor = "multi_thread")]
async fn s4_multiple_pairs_isolate() {
    let (server, running) = start_server().await;
    server.register_pair("BTC-USDT", 50_000.0);
    server.register_pair("ETH-USDT", 3_000.0);
    server.register_pair("SOL-USDT", 100.0);

    let mut closes = Vec::new();
    for (pair, anchor) in [("BTC-USDT", 50_000.0), ("ETH-USDT", 3_000.0), ("SOL-USDT", 100.0)] {
        let adapter = binance_spot_adapter(&server, &running);
        let controller = FeedController::new(adapter, pair, "1m", 500).unwrap();
        let bars = controller.fetch_history(None, None, None).await.unwrap();
        let close = bars.last().unwrap().close;
        assert!(close >= anchor * 0.7 && close <= anchor * 1.3);
        closes.push(close);
    }

    assert_ne!(closes[0], closes[1]);
    assert_ne!(closes[1], closes[2]);
    assert_ne!(closes[0], closes[2]);

    running.shutdown().await;
}

/// S5: network faults don't kill the loop. Under induced latency,
/// packet loss, and errors, repeated `fetch_history` calls eventually
/// succeed; resetting conditions restores reliable behavior.
#[tokio::test(flavor = "multi_thread")]
async fn s5_network_faults_dont_kill_the_loop() {
    let (server, running) = start_server().await;
    server.register_pair("BTC-USDT", 50_000.0);
    server.set_network_conditions(NetworkConditions {
        latency_ms: 50,
        packet_loss: 0.2,
        error_rate: 0.2,
    });

    let adapter = binance_spot_adapter(&server, &running);
    let controller = FeedController::new(adapter, "BTC-USDT", "1m", 500).unwrap();

    let mut succeeded = false;
    for _ in 0..5 {
        if controller.fetch_history(None, None, None).await.is_ok() {
            succeeded = true;
            break;
        }
    }
    assert!(succeeded, "at least one of five attempts should succeed");

    server.set_network_conditions(NetworkConditions::default());
    let result = tokio::time::timeout(Duration::from_secs(10), controller.fetch_history(None, None, None)).await;
    assert!(result.is_ok() && result.unwrap().is_ok());

    running.shutdown().await;
}

/// S7: injected price events reach a live streaming subscriber. The
/// simulator's scripted trend/jump injection isn't just a pure-function
/// unit of `candle_factory` — it's a capability of the running server a
/// test can trigger mid-stream and observe downstream.
#[tokio::test(flavor = "multi_thread")]
async fn s7_injected_price_event_reaches_streaming_subscriber() {
    let (server, running) = start_server().await;
    server.register_pair("BTC-USDT", 50_000.0);

    let adapter = binance_spot_adapter(&server, &running);
    let mut controller = FeedController::new(adapter, "BTC-USDT", "1m", 500).unwrap();
    controller.start(StrategyKind::Websocket).await.unwrap();

    // Let the subscription land before the injected bars are generated.
    tokio::time::sleep(Duration::from_millis(500)).await;

    server.inject_trend("binance_spot", "BTCUSDT", "1m", 3, 0.05);
    tokio::time::sleep(Duration::from_millis(500)).await;
    server.inject_price_event("binance_spot", "BTCUSDT", "1m", 0.5);

    tokio::time::sleep(Duration::from_secs(1)).await;

    let bars = controller.bars().await;
    assert!(bars.len() >= 4, "expected the trend and the jump to both land in the store");
    let jump = bars.last().unwrap();
    let before_jump = bars[bars.len() - 2];
    assert!(jump.close > before_jump.close, "the injected jump should push the close up");
    assert!(jump.close <= 50_000.0 * 1.3, "generation never drifts more than 30% from the anchor");

    controller.stop().await;
    running.shutdown().await;
}

/// S6: interval != delta in the mock. Each of three intervals yields an
/// equidistant series with the exact expected spacing.
#[tokio::test(flavor = "multi_thread")]
async fn s6_interval_mismatch_in_the_mock() {
    let (server, running) = start_server().await;
    server.register_pair("BTC-USDT", 50_000.0);

    for (interval, expected_seconds) in [("1m", 60), ("5m", 300), ("1h", 3600)] {
        let adapter = binance_spot_adapter(&server, &running);
        let controller = FeedController::new(adapter, "BTC-USDT", interval, 500).unwrap();
        controller.fetch_history(None, None, None).await.unwrap();

        assert!(controller.gap_free().await);
        let bars = controller.bars().await;
        if bars.len() >= 2 {
            let spacing = bars[1].open_time - bars[0].open_time;
            assert_eq!(spacing, expected_seconds);
        }
    }

    running.shutdown().await;
}
