use common::{Candle, Direction};

/// Wick must be at least this multiple of the body for hammer/shooting star.
const WICK_BODY_RATIO: f64 = 2.0;
/// Body must cover at least this share of the bar's range; filters out dojis.
const BODY_RANGE_RATIO: f64 = 0.1;
/// Opposite wick may be at most half the body.
const OPPOSITE_WICK_RATIO: f64 = 0.5;
/// Bars used to establish the trend preceding a reversal pattern.
const TREND_LOOKBACK: usize = 5;

/// A candlestick pattern found on the tail of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternMatch {
    pub direction: Direction,
    pub name: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PriorTrend {
    Up,
    Down,
}

/// Scan the last one to three candles for reversal/continuation patterns.
///
/// Reversal wicks (hammer, shooting star) only count in the right trend
/// context: a hammer needs a preceding downtrend, a shooting star a
/// preceding uptrend. Without enough history to establish the trend, those
/// two are not scored.
pub fn detect(candles: &[Candle]) -> Vec<PatternMatch> {
    let mut matches = Vec::new();
    let n = candles.len();
    if n == 0 {
        return matches;
    }

    let last = &candles[n - 1];
    let trend = prior_trend(candles);

    if is_hammer(last) && trend == Some(PriorTrend::Down) {
        matches.push(PatternMatch { direction: Direction::Long, name: "hammer" });
    }
    if is_shooting_star(last) && trend == Some(PriorTrend::Up) {
        matches.push(PatternMatch { direction: Direction::Short, name: "shooting star" });
    }

    if n >= 2 {
        let prev = &candles[n - 2];
        if is_bullish_engulfing(prev, last) {
            matches.push(PatternMatch { direction: Direction::Long, name: "bullish engulfing" });
        }
        if is_bearish_engulfing(prev, last) {
            matches.push(PatternMatch { direction: Direction::Short, name: "bearish engulfing" });
        }
    }

    if n >= 3 {
        let tail = &candles[n - 3..];
        if is_three_white_soldiers(tail) {
            matches.push(PatternMatch {
                direction: Direction::Long,
                name: "three white soldiers",
            });
        }
        if is_three_black_crows(tail) {
            matches.push(PatternMatch {
                direction: Direction::Short,
                name: "three black crows",
            });
        }
    }

    matches
}

/// Trend of the closes leading into the last candle, or `None` when the
/// window is too short or the closes are flat.
fn prior_trend(candles: &[Candle]) -> Option<PriorTrend> {
    let n = candles.len();
    if n < TREND_LOOKBACK + 2 {
        return None;
    }
    let before = candles[n - 2 - TREND_LOOKBACK].close;
    let entering = candles[n - 2].close;
    if entering < before {
        Some(PriorTrend::Down)
    } else if entering > before {
        Some(PriorTrend::Up)
    } else {
        None
    }
}

fn body(c: &Candle) -> f64 {
    (c.close - c.open).abs()
}

fn upper_wick(c: &Candle) -> f64 {
    c.high - c.open.max(c.close)
}

fn lower_wick(c: &Candle) -> f64 {
    c.open.min(c.close) - c.low
}

fn has_solid_body(c: &Candle) -> bool {
    let range = c.high - c.low;
    range > 0.0 && body(c) >= BODY_RANGE_RATIO * range
}

/// Long lower wick, small body near the top of the bar.
fn is_hammer(c: &Candle) -> bool {
    has_solid_body(c)
        && lower_wick(c) >= WICK_BODY_RATIO * body(c)
        && upper_wick(c) <= OPPOSITE_WICK_RATIO * body(c)
}

/// Long upper wick, small body near the bottom of the bar.
fn is_shooting_star(c: &Candle) -> bool {
    has_solid_body(c)
        && upper_wick(c) >= WICK_BODY_RATIO * body(c)
        && lower_wick(c) <= OPPOSITE_WICK_RATIO * body(c)
}

fn is_bullish_engulfing(prev: &Candle, last: &Candle) -> bool {
    !prev.is_bullish()
        && last.is_bullish()
        && last.open < prev.close
        && last.close > prev.open
}

fn is_bearish_engulfing(prev: &Candle, last: &Candle) -> bool {
    prev.is_bullish()
        && !last.is_bullish()
        && last.open > prev.close
        && last.close < prev.open
}

fn is_three_white_soldiers(tail: &[Candle]) -> bool {
    tail.len() == 3
        && tail.iter().all(Candle::is_bullish)
        && tail[1].close > tail[0].close
        && tail[2].close > tail[1].close
}

fn is_three_black_crows(tail: &[Candle]) -> bool {
    tail.len() == 3
        && tail.iter().all(|c| !c.is_bullish() && c.close != c.open)
        && tail[1].close < tail[0].close
        && tail[2].close < tail[1].close
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        Candle {
            timestamp: start + Duration::hours(i as i64),
            open,
            high,
            low,
            close,
            volume: 10.0,
        }
    }

    /// Declining closes establishing a downtrend, ending with `last`.
    fn with_downtrend(last: Candle) -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..8)
            .map(|i| {
                let close = 110.0 - i as f64;
                bar(i, close + 0.5, close + 1.0, close - 1.0, close)
            })
            .collect();
        candles.push(last);
        candles
    }

    fn with_uptrend(last: Candle) -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..8)
            .map(|i| {
                let close = 100.0 + i as f64;
                bar(i, close - 0.5, close + 1.0, close - 1.0, close)
            })
            .collect();
        candles.push(last);
        candles
    }

    #[test]
    fn hammer_in_downtrend_scores_long() {
        // body 1.0 near the top, lower wick 3.0, tiny upper wick
        let hammer = bar(8, 100.0, 101.2, 97.0, 101.0);
        let matches = detect(&with_downtrend(hammer));
        assert!(matches.iter().any(|m| m.name == "hammer" && m.direction == Direction::Long));
    }

    #[test]
    fn hammer_without_downtrend_is_ignored() {
        let hammer = bar(8, 100.0, 101.2, 97.0, 101.0);
        let matches = detect(&with_uptrend(hammer));
        assert!(!matches.iter().any(|m| m.name == "hammer"));
    }

    #[test]
    fn hammer_needs_trend_history() {
        let hammer = bar(0, 100.0, 101.2, 97.0, 101.0);
        let matches = detect(&[hammer]);
        assert!(!matches.iter().any(|m| m.name == "hammer"));
    }

    #[test]
    fn shooting_star_in_uptrend_scores_short() {
        // bearish body 0.9 near the bottom, upper wick 2.1, lower wick 0.2
        let star = bar(8, 108.9, 111.0, 107.8, 108.0);
        let matches = detect(&with_uptrend(star));
        assert!(matches
            .iter()
            .any(|m| m.name == "shooting star" && m.direction == Direction::Short));
    }

    #[test]
    fn doji_wick_is_not_a_hammer() {
        // body is under 10% of the range
        let doji = bar(8, 100.0, 100.3, 96.0, 100.05);
        let matches = detect(&with_downtrend(doji));
        assert!(!matches.iter().any(|m| m.name == "hammer"));
    }

    #[test]
    fn bullish_engulfing_detected() {
        let prev = bar(0, 101.0, 101.5, 99.5, 100.0); // bearish
        let last = bar(1, 99.5, 102.5, 99.0, 102.0); // engulfs prev body
        let matches = detect(&[prev, last]);
        assert!(matches
            .iter()
            .any(|m| m.name == "bullish engulfing" && m.direction == Direction::Long));
    }

    #[test]
    fn bearish_engulfing_detected() {
        let prev = bar(0, 100.0, 101.5, 99.5, 101.0); // bullish
        let last = bar(1, 101.5, 102.0, 98.5, 99.0); // engulfs prev body downward
        let matches = detect(&[prev, last]);
        assert!(matches
            .iter()
            .any(|m| m.name == "bearish engulfing" && m.direction == Direction::Short));
    }

    #[test]
    fn three_white_soldiers_detected() {
        let candles = vec![
            bar(0, 100.0, 101.5, 99.8, 101.0),
            bar(1, 101.0, 102.5, 100.8, 102.0),
            bar(2, 102.0, 103.5, 101.8, 103.0),
        ];
        let matches = detect(&candles);
        assert!(matches
            .iter()
            .any(|m| m.name == "three white soldiers" && m.direction == Direction::Long));
    }

    #[test]
    fn three_black_crows_detected() {
        let candles = vec![
            bar(0, 103.0, 103.2, 101.8, 102.0),
            bar(1, 102.0, 102.2, 100.8, 101.0),
            bar(2, 101.0, 101.2, 99.8, 100.0),
        ];
        let matches = detect(&candles);
        assert!(matches
            .iter()
            .any(|m| m.name == "three black crows" && m.direction == Direction::Short));
    }

    #[test]
    fn flat_bars_match_nothing() {
        let candles: Vec<Candle> = (0..10).map(|i| bar(i, 100.0, 100.0, 100.0, 100.0)).collect();
        assert!(detect(&candles).is_empty());
    }
}
