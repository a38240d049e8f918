pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;

pub use atr::Atr;
pub use bollinger::{Bollinger, BollingerValue};
pub use ema::Ema;
pub use macd::{Macd, MacdValue};
pub use rsi::Rsi;

use common::{Candle, IndicatorSnapshot};

/// Window for the rolling volume average used by scoring and triggers.
pub const VOLUME_PERIOD: usize = 20;

/// Assemble the full indicator snapshot for a candle window.
///
/// Pure function of its input. Indicators without enough history come back
/// as `None`; downstream rules treat absence as inapplicable.
pub fn snapshot(candles: &[Candle]) -> IndicatorSnapshot {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let macd = Macd::new(12, 26, 9).compute(&closes);
    let bollinger = Bollinger::new(20, 2.0).compute(&closes);

    let volume_window: Vec<f64> = candles
        .iter()
        .rev()
        .take(VOLUME_PERIOD)
        .map(|c| c.volume)
        .collect();
    let volume_average = if volume_window.is_empty() {
        0.0
    } else {
        volume_window.iter().sum::<f64>() / volume_window.len() as f64
    };

    IndicatorSnapshot {
        rsi: Rsi::new(14).compute(&closes),
        macd: macd.map(|m| m.line),
        macd_signal: macd.map(|m| m.signal),
        macd_histogram: macd.map(|m| m.histogram),
        ema20: Ema::new(20).compute(&closes),
        ema50: Ema::new(50).compute(&closes),
        ema200: Ema::new(200).compute(&closes),
        bollinger_upper: bollinger.map(|b| b.upper),
        bollinger_lower: bollinger.map(|b| b.lower),
        atr: Atr::new(14).compute(candles),
        volume_current: candles.last().map_or(0.0, |c| c.volume),
        volume_average,
        last_close: closes.last().copied().unwrap_or(0.0),
    }
}
