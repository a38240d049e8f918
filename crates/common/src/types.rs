use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar fetched from a market-data provider.
/// Immutable once fetched; windows are ordered ascending by timestamp.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// True when the bar closed above its open.
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

/// Latest quote returned by a price provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    pub change_24h_pct: f64,
    pub volume_24h: f64,
    pub high_24h: f64,
    pub low_24h: f64,
}

/// Candle interval understood by every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// The next timeframe up, used for trend-bias confirmation.
    pub fn higher(&self) -> Timeframe {
        match self {
            Timeframe::M5 => Timeframe::M15,
            Timeframe::M15 => Timeframe::H1,
            Timeframe::M30 => Timeframe::H1,
            Timeframe::H1 => Timeframe::H4,
            Timeframe::H4 => Timeframe::D1,
            Timeframe::D1 => Timeframe::D1,
        }
    }

    pub fn minutes(&self) -> u32 {
        match self {
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(format!("unknown timeframe '{other}'")),
        }
    }
}

/// Indicator values derived from a candle window.
///
/// Recomputed per evaluation cycle, never mutated. A `None` field means the
/// window was too short for that indicator; scoring rules must treat absence
/// as "rule inapplicable", not as zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub ema20: Option<f64>,
    pub ema50: Option<f64>,
    pub ema200: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub atr: Option<f64>,
    pub volume_current: f64,
    pub volume_average: f64,
    pub last_close: f64,
}

/// Direction of a trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

/// Lifecycle state of a signal.
///
/// `Active` is initial. `Invalidated` and `Closed` are terminal.
/// `PartiallyClosed` means at least one take-profit tier was reached but the
/// closed amount is below 100%; the signal stays logically open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum SignalState {
    Active,
    PartiallyClosed,
    Invalidated,
    Closed,
}

impl SignalState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SignalState::Invalidated | SignalState::Closed)
    }
}

impl std::fmt::Display for SignalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalState::Active => "active",
            SignalState::PartiallyClosed => "partially_closed",
            SignalState::Invalidated => "invalidated",
            SignalState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SignalState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SignalState::Active),
            "partially_closed" => Ok(SignalState::PartiallyClosed),
            "invalidated" => Ok(SignalState::Invalidated),
            "closed" => Ok(SignalState::Closed),
            other => Err(format!("unknown signal state '{other}'")),
        }
    }
}

/// Final result of a resolved signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalOutcome {
    Win,
    Loss,
}

impl std::fmt::Display for SignalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalOutcome::Win => write!(f, "win"),
            SignalOutcome::Loss => write!(f, "loss"),
        }
    }
}

impl std::str::FromStr for SignalOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "win" => Ok(SignalOutcome::Win),
            "loss" => Ok(SignalOutcome::Loss),
            other => Err(format!("unknown outcome '{other}'")),
        }
    }
}

/// Why a signal was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    Expiration,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloseReason::TakeProfit => "take_profit",
            CloseReason::StopLoss => "stop_loss",
            CloseReason::Expiration => "expiration",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for CloseReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "take_profit" => Ok(CloseReason::TakeProfit),
            "stop_loss" => Ok(CloseReason::StopLoss),
            "expiration" => Ok(CloseReason::Expiration),
            other => Err(format!("unknown close reason '{other}'")),
        }
    }
}

/// A fully parameterized trading signal.
///
/// Created by the generator once scoring accepts a direction. After creation
/// the lifecycle manager owns the record exclusively: `stop_loss` moves only
/// through trailing-stop/breakeven, take-profit levels never change, and no
/// other component may touch `state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub take_profit_3: f64,
    /// Estimated win probability, 0-100.
    pub probability: u8,
    pub risk_reward_ratio: f64,
    pub reason: String,
    pub timeframe: Timeframe,
    /// Raw score points, kept for calibration-bucket attribution.
    pub score: u32,
    pub state: SignalState,
    /// Percentage of the position already closed (0, 30, 90 or 100).
    pub close_percent: u8,
    pub close_price: Option<f64>,
    pub outcome: Option<SignalOutcome>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Signal {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Terminal result of a signal. Written exactly once, append-only; the store
/// enforces at-most-one record per signal with a uniqueness constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub signal_id: String,
    pub result: SignalOutcome,
    pub reached_price: f64,
    pub close_reason: CloseReason,
    pub verified_at: DateTime<Utc>,
}

/// Probability-calibration unit grouping signals by raw score range.
/// `[min_score, max_score)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBucket {
    pub id: i64,
    pub min_score: u32,
    pub max_score: u32,
    pub total_signals: u32,
    pub wins: u32,
    pub losses: u32,
    /// Realized win percentage, 0-100.
    pub hit_rate: f64,
    /// Calibrated probability, 0-100. Zero until first calibration.
    pub adjusted_probability: u8,
}

impl ScoreBucket {
    /// Minimum resolved signals before the bucket's adjusted probability is
    /// trusted over the raw score formula.
    pub const MIN_SAMPLES: u32 = 10;

    pub fn covers(&self, score: u32) -> bool {
        score >= self.min_score && score < self.max_score
    }

    pub fn has_sufficient_samples(&self) -> bool {
        self.total_signals >= Self::MIN_SAMPLES
    }
}

/// What happened to a signal, for the per-signal audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    TrailingStop,
    Breakeven,
    Invalidated,
    PartialClose,
    Closed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::Created => "created",
            EventKind::TrailingStop => "trailing_stop",
            EventKind::Breakeven => "breakeven",
            EventKind::Invalidated => "invalidated",
            EventKind::PartialClose => "partial_close",
            EventKind::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(EventKind::Created),
            "trailing_stop" => Ok(EventKind::TrailingStop),
            "breakeven" => Ok(EventKind::Breakeven),
            "invalidated" => Ok(EventKind::Invalidated),
            "partial_close" => Ok(EventKind::PartialClose),
            "closed" => Ok(EventKind::Closed),
            other => Err(format!("unknown event kind '{other}'")),
        }
    }
}

/// One entry in a signal's structured, append-only audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEvent {
    pub signal_id: String,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
    pub detail: String,
}

/// Discrete market event found by the trigger detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    VolumeHigh,
    VolumeExtreme,
    PriceMove,
    StrongPriceMove,
    RsiOversold,
    RsiOverbought,
    EmaCrossBullish,
    EmaCrossBearish,
}

/// A detected market trigger with its score contribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub direction: Direction,
    pub points: u32,
    pub detail: String,
}

/// Higher-timeframe directional bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendBias {
    Bullish,
    Bearish,
    Neutral,
}

impl TrendBias {
    /// True when a signal in `direction` goes against this bias.
    pub fn opposes(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (TrendBias::Bullish, Direction::Short) | (TrendBias::Bearish, Direction::Long)
        )
    }

    pub fn aligns_with(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (TrendBias::Bullish, Direction::Long) | (TrendBias::Bearish, Direction::Short)
        )
    }
}

impl std::fmt::Display for TrendBias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrendBias::Bullish => "bullish",
            TrendBias::Bearish => "bearish",
            TrendBias::Neutral => "neutral",
        };
        write!(f, "{s}")
    }
}
