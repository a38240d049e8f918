use proptest::prelude::*;

use common::Direction;
use engine::lifecycle::{breakeven_proposal, trailing_proposal};

proptest! {
    /// For any price path, a LONG stop only ever moves up, and an applied
    /// proposal never crosses the current price.
    #[test]
    fn long_stop_is_monotonic_under_any_price_path(
        prices in proptest::collection::vec(45_000.0f64..55_000.0, 1..60)
    ) {
        let entry = 50_000.0;
        let tp1 = 50_200.0;
        let mut stop = 49_850.0;

        for price in prices {
            let mut updated = stop;
            if let Some(s) = trailing_proposal(Direction::Long, entry, tp1, updated, price, 1.5) {
                prop_assert!(s > updated, "trailing widened risk: {s} <= {updated}");
                prop_assert!(s < price, "trailing crossed price: {s} >= {price}");
                updated = s;
            }
            if let Some(s) = breakeven_proposal(Direction::Long, entry, tp1, updated, price, 0.5) {
                prop_assert!(s > updated, "breakeven widened risk: {s} <= {updated}");
                updated = s;
            }
            prop_assert!(updated >= stop, "stop regressed: {updated} < {stop}");
            stop = updated;
        }
    }

    /// Mirror property for SHORT: the stop only ever moves down and never
    /// undercuts the current price when applied.
    #[test]
    fn short_stop_is_monotonic_under_any_price_path(
        prices in proptest::collection::vec(45_000.0f64..55_000.0, 1..60)
    ) {
        let entry = 50_000.0;
        let tp1 = 49_800.0;
        let mut stop = 50_150.0;

        for price in prices {
            let mut updated = stop;
            if let Some(s) = trailing_proposal(Direction::Short, entry, tp1, updated, price, 1.5) {
                prop_assert!(s < updated, "trailing widened risk: {s} >= {updated}");
                prop_assert!(s > price, "trailing crossed price: {s} <= {price}");
                updated = s;
            }
            if let Some(s) = breakeven_proposal(Direction::Short, entry, tp1, updated, price, 0.5) {
                prop_assert!(s < updated, "breakeven widened risk: {s} >= {updated}");
                updated = s;
            }
            prop_assert!(updated <= stop, "stop regressed: {updated} > {stop}");
            stop = updated;
        }
    }

    /// Lifecycle proposals never panic on extreme inputs.
    #[test]
    fn proposals_never_panic_on_extreme_inputs(
        entry in 0.0001f64..1_000_000.0,
        tp1 in 0.0001f64..1_000_000.0,
        stop in 0.0001f64..1_000_000.0,
        price in 0.0001f64..1_000_000.0,
    ) {
        let _ = trailing_proposal(Direction::Long, entry, tp1, stop, price, 1.5);
        let _ = trailing_proposal(Direction::Short, entry, tp1, stop, price, 1.5);
        let _ = breakeven_proposal(Direction::Long, entry, tp1, stop, price, 0.5);
        let _ = breakeven_proposal(Direction::Short, entry, tp1, stop, price, 0.5);
    }
}
