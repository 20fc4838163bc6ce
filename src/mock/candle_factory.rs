//! Bar generator for the mock server: an initial history plus ongoing
//! per-second extension, bounded by a "max deviation from anchor" rule so
//! generated prices don't random-walk off to nonsense.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bar::Bar;

/// Fraction a generated close may drift from the registered anchor price
/// before generation clamps back toward it.
const MAX_DEVIATION_FROM_ANCHOR: f64 = 0.30;

fn clamp_to_anchor(price: f64, anchor: f64) -> f64 {
    let lo = anchor * (1.0 - MAX_DEVIATION_FROM_ANCHOR);
    let hi = anchor * (1.0 + MAX_DEVIATION_FROM_ANCHOR);
    price.clamp(lo, hi)
}

fn bar_from_close(open_time: i64, open: f64, close: f64, anchor: f64, rng: &mut StdRng) -> Bar {
    let close = clamp_to_anchor(close, anchor);
    let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.002));
    let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.002));
    let base_volume = 10.0 + rng.gen_range(0.0..5.0);
    let quote_volume = base_volume * close;
    let trade_count = 50 + rng.gen_range(0..30);
    let taker_buy_base = base_volume * 0.5;
    let taker_buy_quote = taker_buy_base * close;
    Bar::new(
        open_time,
        open,
        high,
        low,
        close,
        base_volume,
        quote_volume,
        trade_count,
        taker_buy_base,
        taker_buy_quote,
    )
}

/// A single random-walk bar continuing from `previous` (or a synthetic
/// flat bar at `anchor` if this is the first bar).
pub fn create_random(open_time: i64, anchor: f64, previous: Option<Bar>, rng: &mut StdRng) -> Bar {
    let open = previous.map(|b| b.close).unwrap_or(anchor);
    let close = open * (1.0 + rng.gen_range(-0.01..0.01));
    bar_from_close(open_time, open, close, anchor, rng)
}

/// `count` bars forming a consistent up/down trend of `drift_per_bar`
/// (fractional, e.g. `0.002` for +0.2%/bar), starting at `anchor`.
pub fn create_trending_series(
    start_open_time: i64,
    interval_seconds: i64,
    anchor: f64,
    count: usize,
    drift_per_bar: f64,
    rng: &mut StdRng,
) -> Vec<Bar> {
    let mut bars = Vec::with_capacity(count);
    let mut open = anchor;
    for i in 0..count {
        let open_time = start_open_time + interval_seconds * i as i64;
        let close = open * (1.0 + drift_per_bar + rng.gen_range(-0.003..0.003));
        let bar = bar_from_close(open_time, open, close, anchor, rng);
        open = bar.close;
        bars.push(bar);
    }
    bars
}

/// Nudge a still-forming (not yet closed) bar by one live tick: the close
/// takes a small random walk from its current value, high/low widen to
/// accommodate it, volume accumulates. `open` and `open_time` are
/// preserved, so this represents the same candle, later in its life.
pub fn tick_in_place(bar: Bar, anchor: f64, rng: &mut StdRng) -> Bar {
    let new_close = clamp_to_anchor(bar.close * (1.0 + rng.gen_range(-0.004..0.004)), anchor);
    Bar::new(
        bar.open_time,
        bar.open,
        bar.high.max(new_close),
        bar.low.min(new_close),
        new_close,
        bar.base_volume + rng.gen_range(0.0..0.5),
        bar.quote_volume + rng.gen_range(0.0..0.5) * new_close,
        bar.trade_count + rng.gen_range(0..3),
        bar.taker_buy_base_volume + rng.gen_range(0.0..0.25),
        bar.taker_buy_quote_volume + rng.gen_range(0.0..0.25) * new_close,
    )
}

/// A single discontinuous jump of `magnitude` (fractional, signed) applied
/// to `previous`'s close, for scenario tests injecting a price event.
pub fn create_price_event(open_time: i64, anchor: f64, previous: Bar, magnitude: f64) -> Bar {
    let open = previous.close;
    let close = clamp_to_anchor(open * (1.0 + magnitude), anchor);
    let high = open.max(close);
    let low = open.min(close);
    Bar::new(open_time, open, high, low, close, 25.0, 25.0 * close, 80, 12.0, 12.0 * close)
}

/// An initial history of `count` bars ending at `end_open_time`, used to
/// seed a (pair, interval)'s candle list on registration. `seed` makes the
/// series reproducible across test runs.
pub fn create_market_simulation(
    end_open_time: i64,
    interval_seconds: i64,
    anchor: f64,
    count: usize,
    seed: u64,
) -> Vec<Bar> {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = end_open_time - interval_seconds * (count.saturating_sub(1)) as i64;
    let mut bars = Vec::with_capacity(count);
    let mut previous = None;
    for i in 0..count {
        let open_time = start + interval_seconds * i as i64;
        let bar = create_random(open_time, anchor, previous, &mut rng);
        previous = Some(bar);
        bars.push(bar);
    }
    bars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_bars_stay_within_anchor_deviation() {
        let bars = create_market_simulation(600_000, 60, 100.0, 200, 42);
        for bar in &bars {
            assert!(bar.close >= 100.0 * 0.7 && bar.close <= 100.0 * 1.3);
        }
    }

    #[test]
    fn market_simulation_bars_are_equidistant() {
        let bars = create_market_simulation(600_000, 60, 100.0, 50, 7);
        for w in bars.windows(2) {
            assert_eq!(w[1].open_time - w[0].open_time, 60);
        }
    }

    #[test]
    fn trending_series_trends_in_the_requested_direction() {
        let mut rng = StdRng::seed_from_u64(99);
        let bars = create_trending_series(0, 60, 100.0, 40, 0.01, &mut rng);
        assert!(bars.last().unwrap().close > bars.first().unwrap().open);
    }

    #[test]
    fn price_event_is_clamped_to_anchor_band() {
        let previous = Bar::new(0, 100.0, 100.0, 100.0, 100.0, 1.0, 1.0, 1, 0.0, 0.0);
        let bar = create_price_event(60, 100.0, previous, 5.0); // +500%, should clamp
        assert!(bar.close <= 130.0);
    }

    #[test]
    fn tick_in_place_preserves_open_and_open_time() {
        let mut rng = StdRng::seed_from_u64(7);
        let bar = Bar::new(120, 100.0, 101.0, 99.0, 100.5, 10.0, 1000.0, 5, 5.0, 500.0);
        let ticked = tick_in_place(bar, 100.0, &mut rng);
        assert_eq!(ticked.open_time, bar.open_time);
        assert_eq!(ticked.open, bar.open);
        assert!(ticked.base_volume >= bar.base_volume);
    }
}
