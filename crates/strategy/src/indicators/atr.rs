use common::Candle;

/// ATR (Average True Range), Wilder-smoothed.
///
/// True range needs a previous close, so `period + 1` candles are required
/// before a value is available.
#[derive(Debug, Clone)]
pub struct Atr {
    pub period: usize,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "ATR period must be >= 1");
        Self { period }
    }

    pub fn compute(&self, candles: &[Candle]) -> Option<f64> {
        if candles.len() < self.period + 1 {
            return None;
        }

        let true_ranges: Vec<f64> = candles
            .windows(2)
            .map(|w| {
                let prev_close = w[0].close;
                let c = &w[1];
                (c.high - c.low)
                    .max((c.high - prev_close).abs())
                    .max((c.low - prev_close).abs())
            })
            .collect();

        let mut atr = true_ranges[..self.period].iter().sum::<f64>() / self.period as f64;
        for &tr in &true_ranges[self.period..] {
            atr = (atr * (self.period - 1) as f64 + tr) / self.period as f64;
        }
        Some(atr)
    }
}
