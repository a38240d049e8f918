use common::{Candle, Direction, IndicatorSnapshot, TrendBias, Trigger, TriggerKind};

use crate::indicators;

/// Minimum candles before trigger detection runs at all.
pub const MIN_TRIGGER_CANDLES: usize = 20;

/// Gates for assembling a dynamic signal out of detected triggers.
pub const DYNAMIC_MIN_POINTS: u32 = 30;
pub const DYNAMIC_MIN_TRIGGERS: usize = 2;
/// Dynamic signals get a deliberately conservative probability band.
pub const DYNAMIC_MIN_PROBABILITY: u8 = 30;
pub const DYNAMIC_MAX_PROBABILITY: u8 = 70;

/// Thresholds and point weights for the trigger detector.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub volume_high_ratio: f64,
    pub volume_extreme_ratio: f64,
    pub volume_high_points: u32,
    pub volume_extreme_points: u32,
    pub price_move_pct: f64,
    pub strong_price_move_pct: f64,
    pub price_move_points: u32,
    pub strong_price_move_points: u32,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub rsi_points: u32,
    pub ema_cross_points: u32,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            volume_high_ratio: 1.5,
            volume_extreme_ratio: 2.0,
            volume_high_points: 10,
            volume_extreme_points: 20,
            price_move_pct: 1.0,
            strong_price_move_pct: 2.0,
            price_move_points: 15,
            strong_price_move_points: 25,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            rsi_points: 15,
            ema_cross_points: 20,
        }
    }
}

/// Scan a short-window candle series for discrete market events.
///
/// Pure and side-effect free; safe to run in parallel across symbols and
/// timeframes. The snapshot must have been computed over the same window.
pub fn detect(candles: &[Candle], ind: &IndicatorSnapshot, cfg: &TriggerConfig) -> Vec<Trigger> {
    let mut triggers = Vec::new();
    let n = candles.len();
    if n < MIN_TRIGGER_CANDLES {
        return triggers;
    }
    let last = &candles[n - 1];
    let prev = &candles[n - 2];

    // Volume spike against the rolling average
    if ind.volume_average > 0.0 {
        let ratio = last.volume / ind.volume_average;
        let direction = if last.is_bullish() { Direction::Long } else { Direction::Short };
        if ratio >= cfg.volume_extreme_ratio {
            triggers.push(Trigger {
                kind: TriggerKind::VolumeExtreme,
                direction,
                points: cfg.volume_extreme_points,
                detail: format!("volume at {:.0}% of average", ratio * 100.0),
            });
        } else if ratio >= cfg.volume_high_ratio {
            triggers.push(Trigger {
                kind: TriggerKind::VolumeHigh,
                direction,
                points: cfg.volume_high_points,
                detail: format!("volume at {:.0}% of average", ratio * 100.0),
            });
        }
    }

    // Fast price move over the last bar
    if prev.close > 0.0 {
        let change_pct = (last.close - prev.close) / prev.close * 100.0;
        let direction = if change_pct > 0.0 { Direction::Long } else { Direction::Short };
        if change_pct.abs() >= cfg.strong_price_move_pct {
            triggers.push(Trigger {
                kind: TriggerKind::StrongPriceMove,
                direction,
                points: cfg.strong_price_move_points,
                detail: format!("{change_pct:+.2}% move in one bar"),
            });
        } else if change_pct.abs() >= cfg.price_move_pct {
            triggers.push(Trigger {
                kind: TriggerKind::PriceMove,
                direction,
                points: cfg.price_move_points,
                detail: format!("{change_pct:+.2}% move in one bar"),
            });
        }
    }

    // RSI extremes
    if let Some(rsi) = ind.rsi {
        if rsi < cfg.rsi_oversold {
            triggers.push(Trigger {
                kind: TriggerKind::RsiOversold,
                direction: Direction::Long,
                points: cfg.rsi_points,
                detail: format!("RSI oversold ({rsi:.1})"),
            });
        } else if rsi > cfg.rsi_overbought {
            triggers.push(Trigger {
                kind: TriggerKind::RsiOverbought,
                direction: Direction::Short,
                points: cfg.rsi_points,
                detail: format!("RSI overbought ({rsi:.1})"),
            });
        }
    }

    // EMA 20/50 cross against the previous bar's values
    let prev_ind = indicators::snapshot(&candles[..n - 1]);
    if let (Some(fast_now), Some(slow_now), Some(fast_prev), Some(slow_prev)) =
        (ind.ema20, ind.ema50, prev_ind.ema20, prev_ind.ema50)
    {
        if fast_now > slow_now && fast_prev <= slow_prev {
            triggers.push(Trigger {
                kind: TriggerKind::EmaCrossBullish,
                direction: Direction::Long,
                points: cfg.ema_cross_points,
                detail: "EMA 20 crossed above EMA 50".into(),
            });
        } else if fast_now < slow_now && fast_prev >= slow_prev {
            triggers.push(Trigger {
                kind: TriggerKind::EmaCrossBearish,
                direction: Direction::Short,
                points: cfg.ema_cross_points,
                detail: "EMA 20 crossed below EMA 50".into(),
            });
        }
    }

    triggers
}

/// The direction backed by strictly more triggers, with its aligned subset.
/// A tie means no dominant direction.
pub fn dominant(triggers: &[Trigger]) -> Option<(Direction, Vec<&Trigger>)> {
    let long: Vec<&Trigger> =
        triggers.iter().filter(|t| t.direction == Direction::Long).collect();
    let short: Vec<&Trigger> =
        triggers.iter().filter(|t| t.direction == Direction::Short).collect();

    if long.len() > short.len() {
        Some((Direction::Long, long))
    } else if short.len() > long.len() {
        Some((Direction::Short, short))
    } else {
        None
    }
}

/// Multi-timeframe context adjustment for a dynamic signal's points.
/// The 4h bias dominates; 1h alignment adds a smaller bonus.
pub fn context_adjustment(direction: Direction, bias_4h: TrendBias, bias_1h: TrendBias) -> i32 {
    let mut adjustment = 0;
    if bias_4h.aligns_with(direction) {
        adjustment += 10;
    } else if bias_4h.opposes(direction) {
        adjustment -= 15;
    }
    if bias_1h.aligns_with(direction) {
        adjustment += 5;
    }
    adjustment
}
