use candle_feed::{FeedController, StrategyKind};
use candle_feed::adapter::binance::BinanceAdapter;

use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let adapter = Arc::new(BinanceAdapter::spot());
    let mut controller = FeedController::new(adapter, "BTC-USDT", "1m", 500)?;

    controller.fetch_history(None, None, Some(200)).await?;
    controller.start(StrategyKind::Auto).await?;

    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));
    loop {
        ticker.tick().await;
        match controller.bars().await.last() {
            Some(bar) => tracing::info!(?bar, gap_free = controller.gap_free().await, "latest bar"),
            None => tracing::info!("no bars yet"),
        }
    }
}
