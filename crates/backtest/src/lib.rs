use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use common::{Candle, Direction, Error, Result, SignalOutcome};
use strategy::{builder, indicators, scorer, SignalLevels};

/// Backtest parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Candles of history required before the first evaluation.
    pub lookback: usize,
    /// How many candles ahead a signal is given to resolve.
    pub resolve_horizon: usize,
    /// Width of the score buckets used in the report.
    pub bucket_width: u32,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            lookback: scorer::MIN_CANDLES,
            resolve_horizon: 100,
            bucket_width: 10,
        }
    }
}

/// One simulated trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Index of the decision candle within the replayed window.
    pub index: usize,
    pub direction: Direction,
    pub score: u32,
    pub entry_price: f64,
    pub exit_price: f64,
    pub outcome: SignalOutcome,
    /// Signed price move captured by the trade.
    pub pnl: f64,
}

/// Per-group win/loss tally.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GroupStats {
    pub total: u32,
    pub wins: u32,
}

impl GroupStats {
    pub fn win_rate_pct(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.wins) / f64::from(self.total) * 100.0
        }
    }
}

/// Explicit aggregation state threaded through the replay. Each trade folds
/// in through `record`; nothing is accumulated at module scope.
#[derive(Debug, Clone, Default)]
pub struct BacktestReducer {
    total: u32,
    wins: u32,
    by_direction: BTreeMap<String, GroupStats>,
    by_bucket: BTreeMap<u32, GroupStats>,
    best: Option<TradeRecord>,
    worst: Option<TradeRecord>,
    bucket_width: u32,
}

impl BacktestReducer {
    pub fn new(bucket_width: u32) -> Self {
        Self { bucket_width: bucket_width.max(1), ..Self::default() }
    }

    /// Fold one resolved trade into the aggregate and return the reducer.
    pub fn record(mut self, trade: TradeRecord) -> Self {
        self.total += 1;
        let won = trade.outcome == SignalOutcome::Win;
        if won {
            self.wins += 1;
        }

        let dir = self.by_direction.entry(trade.direction.to_string()).or_default();
        dir.total += 1;
        if won {
            dir.wins += 1;
        }

        let bucket_floor = trade.score / self.bucket_width * self.bucket_width;
        let bucket = self.by_bucket.entry(bucket_floor).or_default();
        bucket.total += 1;
        if won {
            bucket.wins += 1;
        }

        if self.best.as_ref().map_or(true, |b| trade.pnl > b.pnl) {
            self.best = Some(trade.clone());
        }
        if self.worst.as_ref().map_or(true, |w| trade.pnl < w.pnl) {
            self.worst = Some(trade.clone());
        }
        self
    }

    pub fn finish(self) -> BacktestReport {
        let win_rate_pct = if self.total == 0 {
            0.0
        } else {
            f64::from(self.wins) / f64::from(self.total) * 100.0
        };
        BacktestReport {
            total_signals: self.total,
            wins: self.wins,
            losses: self.total - self.wins,
            win_rate_pct,
            by_direction: self.by_direction,
            by_bucket: self.by_bucket,
            best_trade: self.best,
            worst_trade: self.worst,
        }
    }
}

/// Aggregated replay results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub total_signals: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate_pct: f64,
    pub by_direction: BTreeMap<String, GroupStats>,
    /// Keyed by bucket floor (score rounded down to the bucket width).
    pub by_bucket: BTreeMap<u32, GroupStats>,
    pub best_trade: Option<TradeRecord>,
    pub worst_trade: Option<TradeRecord>,
}

/// Replay the scorer and builder over a historical window.
///
/// Every evaluation sees only the candles up to its decision index; each
/// accepted signal is resolved against the following `resolve_horizon`
/// candles. Iterations share no mutable state beyond the reducer fold.
pub fn run(candles: &[Candle], config: &BacktestConfig) -> Result<BacktestReport> {
    if candles.len() <= config.lookback + 1 {
        return Err(Error::InsufficientData {
            have: candles.len(),
            need: config.lookback + 2,
        });
    }

    let mut reducer = BacktestReducer::new(config.bucket_width);
    let mut evaluated = 0u32;

    for index in config.lookback..candles.len() - 1 {
        let window = &candles[index + 1 - config.lookback..=index];
        let ind = indicators::snapshot(window);
        let result = scorer::score(window, &ind)?;
        evaluated += 1;

        let Some(direction) = result.direction else { continue };
        let Some(atr) = ind.atr else { continue };
        let entry_price = ind.last_close;
        let Some(levels) = builder::build(direction, entry_price, atr) else { continue };

        let horizon_end = (index + 1 + config.resolve_horizon).min(candles.len());
        let future = &candles[index + 1..horizon_end];
        let trade = resolve_trade(index, direction, result.points, entry_price, &levels, future);
        reducer = reducer.record(trade);
    }

    let report = reducer.finish();
    info!(
        evaluated,
        signals = report.total_signals,
        win_rate = report.win_rate_pct,
        "backtest finished"
    );
    Ok(report)
}

/// Scan forward for a TP3 or stop touch; an untouched horizon resolves as a
/// loss at the last scanned close.
pub fn resolve_trade(
    index: usize,
    direction: Direction,
    score: u32,
    entry_price: f64,
    levels: &SignalLevels,
    future: &[Candle],
) -> TradeRecord {
    let signed_pnl = |exit: f64| match direction {
        Direction::Long => exit - entry_price,
        Direction::Short => entry_price - exit,
    };
    let trade = |exit: f64, outcome: SignalOutcome| TradeRecord {
        index,
        direction,
        score,
        entry_price,
        exit_price: exit,
        outcome,
        pnl: signed_pnl(exit),
    };

    for candle in future {
        match direction {
            Direction::Long => {
                if candle.high >= levels.take_profit_3 {
                    return trade(levels.take_profit_3, SignalOutcome::Win);
                }
                if candle.low <= levels.stop_loss {
                    return trade(levels.stop_loss, SignalOutcome::Loss);
                }
            }
            Direction::Short => {
                if candle.low <= levels.take_profit_3 {
                    return trade(levels.take_profit_3, SignalOutcome::Win);
                }
                if candle.high >= levels.stop_loss {
                    return trade(levels.stop_loss, SignalOutcome::Loss);
                }
            }
        }
    }

    let exit = future.last().map_or(entry_price, |c| c.close);
    trade(exit, SignalOutcome::Loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle {
            timestamp: start + Duration::hours(i as i64),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn levels_long() -> SignalLevels {
        builder::build(Direction::Long, 100.0, 2.0).unwrap()
    }

    #[test]
    fn tp_touch_resolves_win_before_horizon_ends() {
        let levels = levels_long(); // tp3 = 110, stop = 97
        let future = vec![
            bar(0, 100.0, 103.0, 99.0, 102.0, 1.0),
            bar(1, 102.0, 111.0, 101.0, 108.0, 1.0), // high crosses tp3
            bar(2, 108.0, 109.0, 90.0, 95.0, 1.0),   // later stop touch is ignored
        ];
        let trade = resolve_trade(0, Direction::Long, 55, 100.0, &levels, &future);
        assert_eq!(trade.outcome, SignalOutcome::Win);
        assert_eq!(trade.exit_price, 110.0);
        assert!((trade.pnl - 10.0).abs() < 1e-9);
    }

    #[test]
    fn stop_touch_resolves_loss() {
        let levels = levels_long();
        let future = vec![
            bar(0, 100.0, 101.0, 96.0, 98.0, 1.0), // low crosses the 97 stop
            bar(1, 98.0, 120.0, 97.0, 119.0, 1.0),
        ];
        let trade = resolve_trade(0, Direction::Long, 55, 100.0, &levels, &future);
        assert_eq!(trade.outcome, SignalOutcome::Loss);
        assert_eq!(trade.exit_price, 97.0);
        assert!(trade.pnl < 0.0);
    }

    #[test]
    fn untouched_horizon_defaults_to_loss_at_close() {
        let levels = levels_long();
        let future = vec![
            bar(0, 100.0, 102.0, 99.0, 101.0, 1.0),
            bar(1, 101.0, 102.0, 99.0, 99.5, 1.0),
        ];
        let trade = resolve_trade(0, Direction::Long, 55, 100.0, &levels, &future);
        assert_eq!(trade.outcome, SignalOutcome::Loss);
        assert_eq!(trade.exit_price, 99.5);
    }

    #[test]
    fn short_resolution_mirrors_long() {
        let levels = builder::build(Direction::Short, 100.0, 2.0).unwrap(); // tp3 = 90, stop = 103
        let future = vec![bar(0, 100.0, 101.0, 89.0, 92.0, 1.0)];
        let trade = resolve_trade(0, Direction::Short, 55, 100.0, &levels, &future);
        assert_eq!(trade.outcome, SignalOutcome::Win);
        assert_eq!(trade.exit_price, 90.0);
        assert!((trade.pnl - 10.0).abs() < 1e-9);
    }

    #[test]
    fn reducer_aggregates_by_direction_and_bucket() {
        let win = TradeRecord {
            index: 0,
            direction: Direction::Long,
            score: 72,
            entry_price: 100.0,
            exit_price: 110.0,
            outcome: SignalOutcome::Win,
            pnl: 10.0,
        };
        let loss = TradeRecord {
            index: 1,
            direction: Direction::Short,
            score: 45,
            entry_price: 100.0,
            exit_price: 103.0,
            outcome: SignalOutcome::Loss,
            pnl: -3.0,
        };

        let report = BacktestReducer::new(10)
            .record(win.clone())
            .record(loss.clone())
            .finish();

        assert_eq!(report.total_signals, 2);
        assert_eq!(report.wins, 1);
        assert_eq!(report.losses, 1);
        assert!((report.win_rate_pct - 50.0).abs() < 1e-9);
        assert_eq!(report.by_direction["LONG"].total, 1);
        assert_eq!(report.by_direction["LONG"].wins, 1);
        assert_eq!(report.by_direction["SHORT"].total, 1);
        assert_eq!(report.by_bucket[&70].total, 1);
        assert_eq!(report.by_bucket[&40].total, 1);
        assert_eq!(report.best_trade.unwrap().index, 0);
        assert_eq!(report.worst_trade.unwrap().index, 1);
    }

    #[test]
    fn empty_reducer_reports_zero() {
        let report = BacktestReducer::new(10).finish();
        assert_eq!(report.total_signals, 0);
        assert_eq!(report.win_rate_pct, 0.0);
        assert!(report.best_trade.is_none());
    }

    #[test]
    fn run_rejects_windows_shorter_than_lookback() {
        let candles: Vec<Candle> =
            (0..150).map(|i| bar(i, 100.0, 101.0, 99.0, 100.0, 1.0)).collect();
        let err = run(&candles, &BacktestConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InsufficientData { .. }));
    }

    #[test]
    fn quiet_replay_produces_no_signals() {
        // gentle zig-zag uptrend never satisfies the acceptance gates
        let candles: Vec<Candle> = (0..300)
            .map(|i| {
                let close = 100.0 + 0.1 * i as f64 + 0.3 * (i % 2) as f64;
                bar(i, close - 0.1, close + 0.2, close - 0.4, close, 10.0)
            })
            .collect();
        let report = run(&candles, &BacktestConfig::default()).unwrap();
        assert_eq!(report.total_signals, 0);
    }

    #[test]
    fn crash_replay_yields_short_signals_with_consistent_totals() {
        // long quiet stretch, then a sustained heavy decline: the decline
        // windows score as shorts and resolve within the horizon
        let mut candles: Vec<Candle> = (0..260)
            .map(|i| {
                let close = 100_000.0 + 10.0 * ((i % 2) as f64);
                bar(i, close, close + 25.0, close - 25.0, close, 10.0)
            })
            .collect();
        for i in 0..140 {
            let close = 100_000.0 - 300.0 * i as f64;
            let volume = if i % 3 == 0 { 25.0 } else { 10.0 };
            candles.push(bar(260 + i, close + 300.0, close + 320.0, close - 20.0, close, volume));
        }

        let report = run(&candles, &BacktestConfig::default()).unwrap();
        assert!(report.total_signals > 0, "decline should produce signals");
        assert_eq!(report.wins + report.losses, report.total_signals);
        let by_dir_total: u32 = report.by_direction.values().map(|g| g.total).sum();
        assert_eq!(by_dir_total, report.total_signals);
        let by_bucket_total: u32 = report.by_bucket.values().map(|g| g.total).sum();
        assert_eq!(by_bucket_total, report.total_signals);
        assert!(report.by_direction.contains_key("SHORT"));
    }
}
