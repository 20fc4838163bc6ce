//! The tabular (DataFrame-shaped) view projector: a fixed ten-column
//! schema, in the documented order, handed off to consumer analytics
//! code. This is a handoff shape, not a library — no DataFrame
//! dependency is introduced here.

use crate::bar::Bar;

/// Columnar projection of a bar snapshot. `open_time` and `trade_count`
/// are integer columns; every other column is floating point. Empty
/// input yields an empty table with the same schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BarTable {
    pub open_time: Vec<i64>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
    pub quote_volume: Vec<f64>,
    pub trade_count: Vec<u64>,
    pub taker_buy_base: Vec<f64>,
    pub taker_buy_quote: Vec<f64>,
}

impl BarTable {
    pub fn from_bars(bars: &[Bar]) -> Self {
        let mut table = BarTable {
            open_time: Vec::with_capacity(bars.len()),
            open: Vec::with_capacity(bars.len()),
            high: Vec::with_capacity(bars.len()),
            low: Vec::with_capacity(bars.len()),
            close: Vec::with_capacity(bars.len()),
            volume: Vec::with_capacity(bars.len()),
            quote_volume: Vec::with_capacity(bars.len()),
            trade_count: Vec::with_capacity(bars.len()),
            taker_buy_base: Vec::with_capacity(bars.len()),
            taker_buy_quote: Vec::with_capacity(bars.len()),
        };
        for b in bars {
            table.open_time.push(b.open_time);
            table.open.push(b.open);
            table.high.push(b.high);
            table.low.push(b.low);
            table.close.push(b.close);
            table.volume.push(b.base_volume);
            table.quote_volume.push(b.quote_volume);
            table.trade_count.push(b.trade_count);
            table.taker_buy_base.push(b.taker_buy_base_volume);
            table.taker_buy_quote.push(b.taker_buy_quote_volume);
        }
        table
    }

    pub fn num_rows(&self) -> usize {
        self.open_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open_time.is_empty()
    }

    /// Reconstruct row `i` as a `Bar`, for round-trip checks against the
    /// snapshot that produced this table.
    pub fn row(&self, i: usize) -> Bar {
        Bar::new(
            self.open_time[i],
            self.open[i],
            self.high[i],
            self.low[i],
            self.close[i],
            self.volume[i],
            self.quote_volume[i],
            self.trade_count[i],
            self.taker_buy_base[i],
            self.taker_buy_quote[i],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_table_with_schema() {
        let table = BarTable::from_bars(&[]);
        assert!(table.is_empty());
        assert_eq!(table.open_time.len(), table.open.len());
    }

    #[test]
    fn table_is_row_for_row_equal_to_the_snapshot() {
        let bars = vec![
            Bar::new(60, 1.0, 2.0, 0.5, 1.5, 10.0, 15.0, 3, 1.0, 2.0),
            Bar::new(120, 1.5, 2.5, 1.0, 2.0, 11.0, 16.0, 4, 1.1, 2.1),
        ];
        let table = BarTable::from_bars(&bars);
        assert_eq!(table.num_rows(), bars.len());
        for (i, bar) in bars.iter().enumerate() {
            assert_eq!(table.row(i), *bar);
        }
    }
}
