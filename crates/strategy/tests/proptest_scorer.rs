use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use common::Candle;
use strategy::{builder, indicators, scorer};

fn candles_from(bars: Vec<(f64, f64, f64)>) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    bars.into_iter()
        .enumerate()
        .map(|(i, (open, close, volume))| {
            let high = open.max(close) * 1.001;
            let low = open.min(close) * 0.999;
            Candle {
                timestamp: start + Duration::hours(i as i64),
                open,
                high,
                low,
                close,
                volume,
            }
        })
        .collect()
}

proptest! {
    /// Scoring any 200+ bar window never panics, and an accepted result
    /// always satisfies the acceptance gates.
    #[test]
    fn scorer_gates_hold_on_random_windows(
        bars in proptest::collection::vec(
            (1.0f64..100_000.0, 1.0f64..100_000.0, 0.0f64..1_000.0),
            200..240,
        )
    ) {
        let candles = candles_from(bars);
        let ind = indicators::snapshot(&candles);
        let result = scorer::score(&candles, &ind).unwrap();

        if result.direction.is_some() {
            prop_assert!(result.points >= scorer::MIN_POINTS);
            prop_assert!(result.accepted_reasons().len() >= scorer::MIN_REASONS);
            prop_assert!(result.categories_confirmed >= scorer::MIN_CATEGORIES);
        }
        prop_assert!(scorer::probability(result.points, &ind) <= scorer::MAX_PROBABILITY);
    }

    /// Built levels are always ordered away from entry with the minimum
    /// reward:risk edge, for both directions.
    #[test]
    fn built_levels_always_ordered_with_minimum_edge(
        entry in 1.0f64..1_000_000.0,
        atr in 0.0001f64..10_000.0,
    ) {
        if let Some(levels) = builder::build(common::Direction::Long, entry, atr) {
            prop_assert!(levels.stop_loss < entry);
            prop_assert!(entry < levels.take_profit_1);
            prop_assert!(levels.take_profit_1 < levels.take_profit_2);
            prop_assert!(levels.take_profit_2 < levels.take_profit_3);
            prop_assert!(levels.risk_reward_ratio >= builder::MIN_RISK_REWARD);
        }
        if let Some(levels) = builder::build(common::Direction::Short, entry, atr) {
            prop_assert!(levels.stop_loss > entry);
            prop_assert!(entry > levels.take_profit_1);
            prop_assert!(levels.take_profit_1 > levels.take_profit_2);
            prop_assert!(levels.take_profit_2 > levels.take_profit_3);
            prop_assert!(levels.risk_reward_ratio >= builder::MIN_RISK_REWARD);
        }
    }
}
