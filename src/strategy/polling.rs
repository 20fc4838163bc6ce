//! Polling strategy: wake on interval boundaries, fetch the trailing
//! window, offer each bar to the store, retry forever on failure.

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::adapter::RestParams;
use crate::time_utils::now_seconds;

use super::StrategyContext;

/// Small fixed lag after a boundary, giving the exchange time to close
/// the bar before the historical endpoint reflects it.
const BOUNDARY_LAG_SECONDS: i64 = 2;

pub(crate) async fn run(ctx: StrategyContext, mut stop_rx: oneshot::Receiver<()>) {
    loop {
        let period = ctx.store.lock().await.interval_seconds();
        let sleep_for = seconds_until_next_boundary(now_seconds(), period) + BOUNDARY_LAG_SECONDS;

        tokio::select! {
            _ = &mut stop_rx => {
                debug!(pair = %ctx.pair, interval = %ctx.interval, "polling strategy stopped");
                return;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(sleep_for.max(0) as u64)) => {}
        }

        match fetch_and_offer(&ctx, None, None, None).await {
            Ok(bars) => debug!(pair = %ctx.pair, interval = %ctx.interval, n = bars.len(), "poll tick offered bars"),
            Err(e) => {
                warn!(pair = %ctx.pair, interval = %ctx.interval, error = %e, "poll tick failed, retrying next period");
            }
        }
    }
}

/// Fetch a historical window and offer every bar to the store. Shared by
/// the recurring poll tick above (`start`/`end` both `None`) and
/// [`crate::FeedController::fetch_history`]'s on-demand calls, so both
/// paths validate, fetch, and offer exactly the same way.
pub(crate) async fn fetch_and_offer(
    ctx: &StrategyContext,
    start: Option<i64>,
    end: Option<i64>,
    limit: Option<u32>,
) -> crate::error::Result<Vec<crate::bar::Bar>> {
    let params = RestParams {
        pair: ctx.pair.clone(),
        interval: ctx.interval.clone(),
        start_time: start,
        end_time: end,
        limit: limit.or(Some(ctx.fetch_limit)),
    };
    let bars = ctx.adapter.fetch_history(ctx.network.as_ref(), &params).await?;
    let mut store = ctx.store.lock().await;
    for bar in &bars {
        store.offer(*bar);
    }
    Ok(bars)
}

/// Seconds from `now` until the next multiple of `interval_seconds`.
/// Returns 0 if `now` is already exactly on a boundary.
fn seconds_until_next_boundary(now: i64, interval_seconds: i64) -> i64 {
    let remainder = now.rem_euclid(interval_seconds);
    if remainder == 0 {
        0
    } else {
        interval_seconds - remainder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_aligned_now_waits_zero() {
        assert_eq!(seconds_until_next_boundary(120, 60), 0);
    }

    #[test]
    fn off_boundary_now_waits_the_remainder() {
        assert_eq!(seconds_until_next_boundary(125, 60), 55);
        assert_eq!(seconds_until_next_boundary(61, 60), 59);
    }
}
