use super::ema::ema_series;

/// MACD (Moving Average Convergence/Divergence).
///
/// MACD line = EMA(fast) − EMA(slow); signal = EMA(line, signal_period);
/// histogram = line − signal. Needs `slow + signal_period - 1` closes before
/// a value is available.
#[derive(Debug, Clone)]
pub struct Macd {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

/// Latest MACD line, signal line and histogram values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast < slow, "MACD fast period must be less than slow period");
        Self { fast, slow, signal }
    }

    /// Compute from a slice of close prices (oldest first).
    pub fn compute(&self, closes: &[f64]) -> Option<MacdValue> {
        let fast_series = ema_series(closes, self.fast)?;
        let slow_series = ema_series(closes, self.slow)?;

        // the fast series starts earlier; align both on their tails
        let offset = fast_series.len() - slow_series.len();
        let line: Vec<f64> = slow_series
            .iter()
            .enumerate()
            .map(|(i, slow)| fast_series[i + offset] - slow)
            .collect();

        let signal_series = ema_series(&line, self.signal)?;
        let line_last = *line.last()?;
        let signal_last = *signal_series.last()?;

        Some(MacdValue {
            line: line_last,
            signal: signal_last,
            histogram: line_last - signal_last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_returns_none_with_insufficient_data() {
        let macd = Macd::new(12, 26, 9);
        let prices = vec![100.0; 30]; // needs >= 34
        assert!(macd.compute(&prices).is_none());
    }

    #[test]
    fn macd_of_constant_series_is_flat() {
        let macd = Macd::new(12, 26, 9);
        let prices = vec![250.0; 60];
        let value = macd.compute(&prices).unwrap();
        assert!(value.line.abs() < 1e-9);
        assert!(value.histogram.abs() < 1e-9);
    }

    #[test]
    fn macd_line_positive_in_sustained_uptrend() {
        let macd = Macd::new(12, 26, 9);
        let prices: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let value = macd.compute(&prices).unwrap();
        assert!(value.line > 0.0, "fast EMA should sit above slow EMA, got {value:?}");
    }

    #[test]
    fn macd_line_negative_in_sustained_downtrend() {
        let macd = Macd::new(12, 26, 9);
        let prices: Vec<f64> = (0..80).map(|i| 300.0 - i as f64).collect();
        let value = macd.compute(&prices).unwrap();
        assert!(value.line < 0.0, "fast EMA should sit below slow EMA, got {value:?}");
    }

    #[test]
    fn histogram_turns_positive_after_reversal_up() {
        let macd = Macd::new(3, 6, 3);
        // decline, then a sharp sustained recovery
        let mut prices: Vec<f64> = (0..30).map(|i| 100.0 - i as f64 * 0.5).collect();
        prices.extend((0..30).map(|i| 85.0 + i as f64 * 2.0));
        let value = macd.compute(&prices).unwrap();
        assert!(value.histogram > 0.0, "expected bullish histogram, got {value:?}");
    }
}
