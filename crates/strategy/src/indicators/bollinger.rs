/// Bollinger bands: SMA ± `std_devs` standard deviations over `period` closes.
#[derive(Debug, Clone)]
pub struct Bollinger {
    pub period: usize,
    pub std_devs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerValue {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl Bollinger {
    pub fn new(period: usize, std_devs: f64) -> Self {
        assert!(period >= 2, "Bollinger period must be >= 2");
        Self { period, std_devs }
    }

    /// Compute from a slice of close prices (oldest first).
    /// Returns `None` with fewer than `period` values.
    pub fn compute(&self, closes: &[f64]) -> Option<BollingerValue> {
        if closes.len() < self.period {
            return None;
        }
        let window = &closes[closes.len() - self.period..];
        let mean = window.iter().sum::<f64>() / self.period as f64;
        let variance =
            window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.period as f64;
        let sd = variance.sqrt();

        Some(BollingerValue {
            upper: mean + self.std_devs * sd,
            middle: mean,
            lower: mean - self.std_devs * sd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_returns_none_when_insufficient_data() {
        let bb = Bollinger::new(20, 2.0);
        assert!(bb.compute(&vec![100.0; 19]).is_none());
    }

    #[test]
    fn flat_series_collapses_bands_onto_the_mean() {
        let bb = Bollinger::new(20, 2.0);
        let value = bb.compute(&vec![500.0; 40]).unwrap();
        assert!((value.upper - 500.0).abs() < 1e-9);
        assert!((value.middle - 500.0).abs() < 1e-9);
        assert!((value.lower - 500.0).abs() < 1e-9);
    }

    #[test]
    fn bands_are_symmetric_around_the_mean() {
        let bb = Bollinger::new(5, 2.0);
        let closes = vec![10.0, 12.0, 11.0, 13.0, 9.0];
        let value = bb.compute(&closes).unwrap();
        assert!((value.middle - 11.0).abs() < 1e-9);
        let up = value.upper - value.middle;
        let down = value.middle - value.lower;
        assert!((up - down).abs() < 1e-9);
        assert!(up > 0.0);
    }
}
