use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use common::{
    CloseReason, Direction, Error, EventKind, OutcomeRecord, Result, Signal, SignalEvent,
    SignalOutcome, SignalState,
};
use market::ProviderChain;

use crate::store::{ActiveFilter, SignalStore};

/// Tunables for the monitoring pass.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub symbol: String,
    /// Entry drift (percent) beyond which a still-open signal is invalidated.
    pub max_entry_drift_pct: f64,
    /// Trailing stop distance in multiples of the ATR proxy.
    pub trailing_atr_mult: f64,
    /// Fraction of the way to TP1 that arms the breakeven move.
    pub breakeven_progress: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            symbol: "BTC".to_string(),
            max_entry_drift_pct: 5.0,
            trailing_atr_mult: 1.5,
            breakeven_progress: 0.5,
        }
    }
}

/// A closing condition found by outcome verification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Closing {
    pub result: SignalOutcome,
    pub reason: CloseReason,
    /// Cumulative close percentage this condition corresponds to.
    pub close_percent: u8,
    pub reached_price: f64,
}

/// Owns every signal after creation: validation, trailing-stop and
/// breakeven adjustment, and authoritative outcome verification.
///
/// A pass-wide mutex serializes monitoring passes so recurring runs never
/// interleave mutations on the same signal. Within a pass, each signal and
/// each sub-task captures its own errors; one failure never blocks the rest.
pub struct MonitorService<S> {
    market: Arc<ProviderChain>,
    store: Arc<S>,
    config: MonitorConfig,
    pass_lock: Mutex<()>,
}

impl<S: SignalStore> MonitorService<S> {
    pub fn new(market: Arc<ProviderChain>, store: Arc<S>, config: MonitorConfig) -> Self {
        Self {
            market,
            store,
            config,
            pass_lock: Mutex::new(()),
        }
    }

    /// One monitoring cycle over every open signal.
    ///
    /// A price-fetch failure aborts the whole cycle (there is nothing to
    /// evaluate against); per-signal failures are logged and skipped.
    pub async fn monitor_active_signals(&self) -> Result<()> {
        let _guard = self.pass_lock.lock().await;

        let quote = self.market.price(&self.config.symbol).await?;
        let signals = self.store.read_active_signals(&ActiveFilter::none()).await?;
        info!(count = signals.len(), price = quote.price, "monitoring pass");

        for signal in &signals {
            if let Err(e) = self.monitor_signal(signal, quote.price).await {
                warn!(signal_id = %signal.id, error = %e, "signal monitoring failed");
            }
        }

        if let Err(e) = self.refresh_bucket_stats().await {
            warn!(error = %e, "bucket statistics refresh failed");
        }
        Ok(())
    }

    /// Run the three lifecycle sub-tasks for one signal against `price`.
    /// No-op on signals already in a terminal state.
    pub async fn monitor_signal(&self, signal: &Signal, price: f64) -> Result<()> {
        if signal.is_terminal() {
            return Ok(());
        }

        // 1. validation; a crossed stop is left for verification to close
        match self.validate(signal, price).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => warn!(signal_id = %signal.id, error = %e, "validation sub-task failed"),
        }

        // 2. trailing stop, then breakeven, each against the freshest stop
        let mut stop_loss = signal.stop_loss;
        match self.apply_trailing_stop(signal, stop_loss, price).await {
            Ok(Some(new_stop)) => stop_loss = new_stop,
            Ok(None) => {}
            Err(e) => warn!(signal_id = %signal.id, error = %e, "trailing-stop sub-task failed"),
        }
        match self.apply_breakeven(signal, stop_loss, price).await {
            Ok(Some(new_stop)) => stop_loss = new_stop,
            Ok(None) => {}
            Err(e) => warn!(signal_id = %signal.id, error = %e, "breakeven sub-task failed"),
        }

        // 3. authoritative outcome verification
        self.verify_outcome(signal, stop_loss, price, Utc::now()).await
    }

    /// Invalidate a signal whose market has drifted away from the entry.
    /// Returns true when the signal was invalidated (terminal).
    async fn validate(&self, signal: &Signal, price: f64) -> Result<bool> {
        if stop_crossed(signal.direction, signal.stop_loss, price) {
            return Ok(false);
        }
        let drift = entry_drift_pct(signal.entry_price, price);
        if drift <= self.config.max_entry_drift_pct {
            return Ok(false);
        }

        self.store
            .set_state(&signal.id, SignalState::Invalidated, None, None)
            .await?;
        self.store
            .append_event(&SignalEvent {
                signal_id: signal.id.clone(),
                at: Utc::now(),
                kind: EventKind::Invalidated,
                detail: format!("price drifted {drift:.2}% from entry before fill"),
            })
            .await?;
        info!(signal_id = %signal.id, drift = drift, "signal invalidated");
        Ok(true)
    }

    async fn apply_trailing_stop(
        &self,
        signal: &Signal,
        current_stop: f64,
        price: f64,
    ) -> Result<Option<f64>> {
        let Some(proposal) = trailing_proposal(
            signal.direction,
            signal.entry_price,
            signal.take_profit_1,
            current_stop,
            price,
            self.config.trailing_atr_mult,
        ) else {
            return Ok(None);
        };

        self.store.update_stop_loss(&signal.id, proposal).await?;
        self.store
            .append_event(&SignalEvent {
                signal_id: signal.id.clone(),
                at: Utc::now(),
                kind: EventKind::TrailingStop,
                detail: format!("stop moved {current_stop:.2} -> {proposal:.2}"),
            })
            .await?;
        info!(signal_id = %signal.id, stop = proposal, "trailing stop advanced");
        Ok(Some(proposal))
    }

    async fn apply_breakeven(
        &self,
        signal: &Signal,
        current_stop: f64,
        price: f64,
    ) -> Result<Option<f64>> {
        let Some(proposal) = breakeven_proposal(
            signal.direction,
            signal.entry_price,
            signal.take_profit_1,
            current_stop,
            price,
            self.config.breakeven_progress,
        ) else {
            return Ok(None);
        };

        self.store.update_stop_loss(&signal.id, proposal).await?;
        self.store
            .append_event(&SignalEvent {
                signal_id: signal.id.clone(),
                at: Utc::now(),
                kind: EventKind::Breakeven,
                detail: format!("stop moved to entry ({proposal:.2}), risk eliminated"),
            })
            .await?;
        info!(signal_id = %signal.id, "stop moved to breakeven");
        Ok(Some(proposal))
    }

    /// Apply the highest closing condition the price has reached. The first
    /// condition writes the single outcome record; a concurrent duplicate is
    /// recovered by forcing the terminal state.
    async fn verify_outcome(
        &self,
        signal: &Signal,
        stop_loss: f64,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(closing) = verification_target(signal, stop_loss, price, now) else {
            return Ok(());
        };
        if closing.close_percent <= signal.close_percent {
            return Ok(());
        }

        let mut outcome_column = None;
        if signal.close_percent == 0 {
            let record = OutcomeRecord {
                signal_id: signal.id.clone(),
                result: closing.result,
                reached_price: closing.reached_price,
                close_reason: closing.reason,
                verified_at: now,
            };
            match self.store.insert_outcome(&record).await {
                Ok(()) => outcome_column = Some(closing.result),
                Err(Error::OutcomeConflict(id)) => {
                    // lost a race with another verification pass
                    warn!(signal_id = %id, "outcome already recorded, forcing terminal state");
                    self.store
                        .set_state(&signal.id, SignalState::Closed, None, None)
                        .await?;
                    self.store
                        .append_event(&SignalEvent {
                            signal_id: signal.id.clone(),
                            at: now,
                            kind: EventKind::Closed,
                            detail: "already closed by a concurrent pass".into(),
                        })
                        .await?;
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        if closing.close_percent >= 100 {
            self.store
                .set_close_percent(&signal.id, 100, SignalState::Closed)
                .await?;
            self.store
                .set_state(
                    &signal.id,
                    SignalState::Closed,
                    Some(closing.reached_price),
                    outcome_column,
                )
                .await?;
            self.store
                .append_event(&SignalEvent {
                    signal_id: signal.id.clone(),
                    at: now,
                    kind: EventKind::Closed,
                    detail: format!("{} via {}", closing.result, closing.reason),
                })
                .await?;
            info!(
                signal_id = %signal.id,
                result = %closing.result,
                reason = %closing.reason,
                "signal closed"
            );
        } else {
            self.store
                .set_close_percent(&signal.id, closing.close_percent, SignalState::PartiallyClosed)
                .await?;
            if outcome_column.is_some() {
                self.store
                    .set_state(&signal.id, SignalState::PartiallyClosed, None, outcome_column)
                    .await?;
            }
            self.store
                .append_event(&SignalEvent {
                    signal_id: signal.id.clone(),
                    at: now,
                    kind: EventKind::PartialClose,
                    detail: format!(
                        "take-profit tier reached, {}% closed",
                        closing.close_percent
                    ),
                })
                .await?;
            info!(
                signal_id = %signal.id,
                close_percent = closing.close_percent,
                "signal partially closed"
            );
        }
        Ok(())
    }

    /// Recompute per-bucket totals from the outcome aggregates. Runs after
    /// every verification pass so calibration always sees fresh numbers.
    pub async fn refresh_bucket_stats(&self) -> Result<()> {
        let buckets = self.store.read_score_buckets().await?;
        for bucket in buckets {
            let stats = self
                .store
                .outcome_stats_for_range(bucket.min_score, bucket.max_score)
                .await?;
            if stats.total == 0 {
                continue;
            }
            let resolved = stats.wins + stats.losses;
            let hit_rate = if resolved > 0 {
                f64::from(stats.wins) / f64::from(resolved) * 100.0
            } else {
                0.0
            };
            self.store
                .update_bucket_stats(bucket.id, stats.total, stats.wins, stats.losses, hit_rate)
                .await?;
        }
        Ok(())
    }
}

// ─── Pure lifecycle decisions ─────────────────────────────────────────────────

/// Percentage distance between entry and the current price.
pub fn entry_drift_pct(entry_price: f64, price: f64) -> f64 {
    if entry_price <= 0.0 {
        return 0.0;
    }
    (price - entry_price).abs() / entry_price * 100.0
}

/// Whether the price has crossed the stop, per direction.
pub fn stop_crossed(direction: Direction, stop_loss: f64, price: f64) -> bool {
    match direction {
        Direction::Long => price <= stop_loss,
        Direction::Short => price >= stop_loss,
    }
}

/// Trailing-stop proposal once price has reached TP1.
///
/// The ATR proxy is recovered from the TP1 distance (TP1 sits two ATRs from
/// entry, so half the distance approximates one ATR). The proposal is
/// returned only when it strictly improves the stop without crossing the
/// current price; risk never widens.
pub fn trailing_proposal(
    direction: Direction,
    entry_price: f64,
    take_profit_1: f64,
    stop_loss: f64,
    price: f64,
    atr_mult: f64,
) -> Option<f64> {
    let atr_proxy = (take_profit_1 - entry_price).abs() / 2.0;
    if atr_proxy <= 0.0 {
        return None;
    }

    match direction {
        Direction::Long => {
            if price < take_profit_1 {
                return None;
            }
            let proposed = price - atr_mult * atr_proxy;
            (proposed > stop_loss && proposed < price).then_some(proposed)
        }
        Direction::Short => {
            if price > take_profit_1 {
                return None;
            }
            let proposed = price + atr_mult * atr_proxy;
            (proposed < stop_loss && proposed > price).then_some(proposed)
        }
    }
}

/// Breakeven proposal: stop to entry once unrealized progress toward TP1
/// reaches the arming fraction, and only when that improves the stop.
pub fn breakeven_proposal(
    direction: Direction,
    entry_price: f64,
    take_profit_1: f64,
    stop_loss: f64,
    price: f64,
    min_progress: f64,
) -> Option<f64> {
    let distance = match direction {
        Direction::Long => take_profit_1 - entry_price,
        Direction::Short => entry_price - take_profit_1,
    };
    if distance <= 0.0 {
        return None;
    }
    let progress = match direction {
        Direction::Long => price - entry_price,
        Direction::Short => entry_price - price,
    } / distance;
    if progress < min_progress {
        return None;
    }

    let improves = match direction {
        Direction::Long => entry_price > stop_loss,
        Direction::Short => entry_price < stop_loss,
    };
    improves.then_some(entry_price)
}

/// The closing condition for `price`, in priority order: TP3, TP2, TP1,
/// stop-loss, expiry. `None` means the signal stays open.
pub fn verification_target(
    signal: &Signal,
    stop_loss: f64,
    price: f64,
    now: DateTime<Utc>,
) -> Option<Closing> {
    let tp = |close_percent: u8, reached: f64| Closing {
        result: SignalOutcome::Win,
        reason: CloseReason::TakeProfit,
        close_percent,
        reached_price: reached,
    };

    let reached = match signal.direction {
        Direction::Long => {
            if price >= signal.take_profit_3 {
                Some(tp(100, signal.take_profit_3))
            } else if price >= signal.take_profit_2 {
                Some(tp(90, signal.take_profit_2))
            } else if price >= signal.take_profit_1 {
                Some(tp(30, signal.take_profit_1))
            } else {
                None
            }
        }
        Direction::Short => {
            if price <= signal.take_profit_3 {
                Some(tp(100, signal.take_profit_3))
            } else if price <= signal.take_profit_2 {
                Some(tp(90, signal.take_profit_2))
            } else if price <= signal.take_profit_1 {
                Some(tp(30, signal.take_profit_1))
            } else {
                None
            }
        }
    };
    if reached.is_some() {
        return reached;
    }

    if stop_crossed(signal.direction, stop_loss, price) {
        return Some(Closing {
            result: SignalOutcome::Loss,
            reason: CloseReason::StopLoss,
            close_percent: 100,
            reached_price: stop_loss,
        });
    }

    if now > signal.expires_at {
        return Some(Closing {
            result: SignalOutcome::Loss,
            reason: CloseReason::Expiration,
            close_percent: 100,
            reached_price: price,
        });
    }

    None
}
