use common::{Candle, Direction, Error, IndicatorSnapshot, Result};

use crate::patterns;

/// Candles required before an evaluation is attempted. EMA 200 and the
/// slower indicators need this much history.
pub const MIN_CANDLES: usize = 200;

/// Acceptance gates: a direction wins only with enough points, enough
/// distinct reasons, and confirmation from at least two reason categories.
pub const MIN_POINTS: u32 = 40;
pub const MIN_REASONS: usize = 3;
pub const MIN_CATEGORIES: usize = 2;

/// Probability is capped regardless of how many rules fire.
pub const MAX_PROBABILITY: u8 = 95;

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;
const EMA200_PROXIMITY_PCT: f64 = 1.0;
const VOLUME_SPIKE_RATIO: f64 = 1.5;
const VOLUME_BOOST_RATIO: f64 = 1.3;
const VOLUME_BOOST_FACTOR: f64 = 1.2;

const POINTS_RSI: u32 = 20;
const POINTS_MACD: u32 = 15;
const POINTS_EMA_STACK: u32 = 20;
const POINTS_EMA200_TEST: u32 = 15;
const POINTS_BOLLINGER: u32 = 10;
const POINTS_VOLUME: u32 = 15;
const POINTS_PATTERN: u32 = 15;

/// Which family of evidence a reason belongs to. Acceptance requires a
/// direction to be confirmed by at least two of the three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// EMA structure and MACD.
    Trend,
    /// RSI and volume.
    Momentum,
    /// Candlestick patterns and Bollinger touches.
    Pattern,
}

/// One scored reason for a direction.
#[derive(Debug, Clone)]
pub struct Reason {
    pub category: Category,
    pub text: String,
}

impl Reason {
    fn trend(text: String) -> Self {
        Self { category: Category::Trend, text }
    }

    fn momentum(text: String) -> Self {
        Self { category: Category::Momentum, text }
    }

    fn pattern(text: String) -> Self {
        Self { category: Category::Pattern, text }
    }
}

/// Outcome of one scoring pass.
///
/// `direction` is `Some` only when every acceptance gate passed; `None` is
/// the normal "no signal this cycle" result, not an error.
#[derive(Debug, Clone)]
pub struct ScoreResult {
    pub direction: Option<Direction>,
    pub points: u32,
    pub reasons_long: Vec<Reason>,
    pub reasons_short: Vec<Reason>,
    /// Distinct categories backing the majority direction.
    pub categories_confirmed: usize,
}

impl ScoreResult {
    /// Reasons for the accepted direction; empty when no direction won.
    pub fn accepted_reasons(&self) -> &[Reason] {
        match self.direction {
            Some(Direction::Long) => &self.reasons_long,
            Some(Direction::Short) => &self.reasons_short,
            None => &[],
        }
    }

    pub fn reason_text(&self) -> String {
        self.accepted_reasons()
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Score a candle window against the weighted rule set.
///
/// Rules are not mutually exclusive; one candle can add reasons to both
/// directions (e.g. a volume spike plus an overbought RSI). Points
/// accumulate globally across every rule that fires.
pub fn score(candles: &[Candle], ind: &IndicatorSnapshot) -> Result<ScoreResult> {
    if candles.len() < MIN_CANDLES {
        return Err(Error::InsufficientData { have: candles.len(), need: MIN_CANDLES });
    }

    let mut points: u32 = 0;
    let mut reasons_long: Vec<Reason> = Vec::new();
    let mut reasons_short: Vec<Reason> = Vec::new();
    let close = ind.last_close;

    // RSI extremes
    if let Some(rsi) = ind.rsi {
        if rsi < RSI_OVERSOLD {
            points += POINTS_RSI;
            reasons_long.push(Reason::momentum(format!("RSI oversold ({rsi:.2})")));
        } else if rsi > RSI_OVERBOUGHT {
            points += POINTS_RSI;
            reasons_short.push(Reason::momentum(format!("RSI overbought ({rsi:.2})")));
        }
    }

    // MACD line vs signal line, confirmed by the histogram
    if let (Some(macd), Some(signal), Some(hist)) =
        (ind.macd, ind.macd_signal, ind.macd_histogram)
    {
        if macd > signal && hist > 0.0 {
            points += POINTS_MACD;
            reasons_long.push(Reason::trend("MACD bullish crossover".into()));
        } else if macd < signal && hist < 0.0 {
            points += POINTS_MACD;
            reasons_short.push(Reason::trend("MACD bearish crossover".into()));
        }
    }

    // EMA 20/50 stack
    if let (Some(ema20), Some(ema50)) = (ind.ema20, ind.ema50) {
        if close > ema20 && ema20 > ema50 {
            points += POINTS_EMA_STACK;
            reasons_long.push(Reason::trend("price above EMA 20/50 (uptrend)".into()));
        } else if close < ema20 && ema20 < ema50 {
            points += POINTS_EMA_STACK;
            reasons_short.push(Reason::trend("price below EMA 20/50 (downtrend)".into()));
        }
    }

    // Price testing the EMA 200 from either side
    if let Some(ema200) = ind.ema200 {
        if close > 0.0 && ((close - ema200).abs() / close) * 100.0 < EMA200_PROXIMITY_PCT {
            points += POINTS_EMA200_TEST;
            if close > ema200 {
                reasons_long.push(Reason::trend("price holding EMA 200 as support".into()));
            } else {
                reasons_short.push(Reason::trend("price rejected at EMA 200 resistance".into()));
            }
        }
    }

    // Bollinger band touches
    if let Some(lower) = ind.bollinger_lower {
        if close <= lower {
            points += POINTS_BOLLINGER;
            reasons_long.push(Reason::pattern("price at lower Bollinger band".into()));
        }
    }
    if let Some(upper) = ind.bollinger_upper {
        if close >= upper {
            points += POINTS_BOLLINGER;
            reasons_short.push(Reason::pattern("price at upper Bollinger band".into()));
        }
    }

    // Volume spike in the direction of the candle
    if ind.volume_average > 0.0 && ind.volume_current > VOLUME_SPIKE_RATIO * ind.volume_average {
        points += POINTS_VOLUME;
        let pct_over = (ind.volume_current / ind.volume_average - 1.0) * 100.0;
        let bullish_bar = candles.last().is_some_and(Candle::is_bullish);
        if bullish_bar {
            reasons_long.push(Reason::momentum(format!(
                "strong bullish volume (+{pct_over:.0}% vs average)"
            )));
        } else {
            reasons_short.push(Reason::momentum(format!(
                "strong bearish volume (+{pct_over:.0}% vs average)"
            )));
        }
    }

    // Candlestick patterns on the tail
    for m in patterns::detect(candles) {
        points += POINTS_PATTERN;
        let reason = Reason::pattern(format!("{} pattern", m.name));
        match m.direction {
            Direction::Long => reasons_long.push(reason),
            Direction::Short => reasons_short.push(reason),
        }
    }

    // Decide: strict reason-count majority, then the remaining gates
    let (majority, reasons) = if reasons_long.len() > reasons_short.len() {
        (Some(Direction::Long), &reasons_long)
    } else if reasons_short.len() > reasons_long.len() {
        (Some(Direction::Short), &reasons_short)
    } else {
        (None, &reasons_long)
    };

    let categories_confirmed = majority.map_or(0, |_| distinct_categories(reasons));
    let accepted = majority.is_some()
        && categories_confirmed >= MIN_CATEGORIES
        && points >= MIN_POINTS
        && reasons.len() >= MIN_REASONS;

    Ok(ScoreResult {
        direction: if accepted { majority } else { None },
        points,
        categories_confirmed,
        reasons_long,
        reasons_short,
    })
}

/// Raw probability estimate for a score: capped points, lifted by a volume
/// boost when current volume runs hot. A calibration bucket with enough
/// samples supersedes this value at the call site.
pub fn probability(points: u32, ind: &IndicatorSnapshot) -> u8 {
    let boost = if ind.volume_average > 0.0
        && ind.volume_current > VOLUME_BOOST_RATIO * ind.volume_average
    {
        VOLUME_BOOST_FACTOR
    } else {
        1.0
    };
    let raw = (points as f64 * boost).round() as u32;
    raw.min(u32::from(MAX_PROBABILITY)) as u8
}

fn distinct_categories(reasons: &[Reason]) -> usize {
    [Category::Trend, Category::Momentum, Category::Pattern]
        .iter()
        .filter(|cat| reasons.iter().any(|r| r.category == **cat))
        .count()
}
