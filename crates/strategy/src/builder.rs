use common::Direction;

/// Stop-loss distance in ATR multiples.
pub const STOP_ATR_MULT: f64 = 1.5;
/// Take-profit tiers in ATR multiples, ordered away from entry.
pub const TP_ATR_MULTS: [f64; 3] = [2.0, 3.5, 5.0];
/// Minimum reward at TP3 relative to the risk at the stop.
pub const MIN_RISK_REWARD: f64 = 2.0;

/// Price levels for a parameterized signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalLevels {
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub take_profit_3: f64,
    pub risk_reward_ratio: f64,
}

/// Size stop-loss and take-profit tiers from the ATR.
///
/// Returns `None` when the ATR is unusable or the reward:risk ratio falls
/// below the minimum edge; the caller must not persist such a signal.
pub fn build(direction: Direction, entry_price: f64, atr: f64) -> Option<SignalLevels> {
    if atr <= 0.0 || entry_price <= 0.0 {
        return None;
    }

    let sign = match direction {
        Direction::Long => 1.0,
        Direction::Short => -1.0,
    };

    let stop_loss = entry_price - sign * STOP_ATR_MULT * atr;
    let [tp1, tp2, tp3] = TP_ATR_MULTS.map(|mult| entry_price + sign * mult * atr);

    let risk = (entry_price - stop_loss).abs();
    let reward = (tp3 - entry_price).abs();
    if risk <= 0.0 {
        return None;
    }
    let risk_reward_ratio = reward / risk;
    if risk_reward_ratio < MIN_RISK_REWARD {
        return None;
    }

    Some(SignalLevels {
        stop_loss,
        take_profit_1: tp1,
        take_profit_2: tp2,
        take_profit_3: tp3,
        risk_reward_ratio,
    })
}
