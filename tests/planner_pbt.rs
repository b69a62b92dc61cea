//! Property tests for trigger planning, quiet hours and adaptive delay.

use proptest::prelude::*;

use microquiz_backend::services::adaptive_delay::{compute_next_delay, MIN_DELAY_MINUTES};
use microquiz_backend::services::interval_planner::{plan_for_frequency, plan_times, Frequency};
use microquiz_backend::services::time_window::{is_quiet_hour, ClockTime};

fn arb_clock() -> impl Strategy<Value = ClockTime> {
    (0u8..24, 0u8..60).prop_map(|(h, m)| ClockTime::new(h, m).unwrap())
}

fn arb_frequency() -> impl Strategy<Value = Frequency> {
    prop_oneof![
        Just(Frequency::Low),
        Just(Frequency::Medium),
        Just(Frequency::High),
        Just(Frequency::Standard),
    ]
}

proptest! {
    #[test]
    fn plan_has_exactly_the_tier_count(
        preferred in prop::collection::vec(arb_clock(), 0..8),
        frequency in arb_frequency(),
        anchor in arb_clock(),
    ) {
        let planned = plan_for_frequency(&preferred, frequency, anchor);
        prop_assert_eq!(planned.len(), frequency.daily_count());
    }

    #[test]
    fn preferred_times_come_first_in_order(
        preferred in prop::collection::vec(arb_clock(), 1..8),
        desired in 1usize..10,
        anchor in arb_clock(),
    ) {
        let planned = plan_times(&preferred, desired, anchor);
        let kept = preferred.len().min(desired);
        prop_assert_eq!(&planned[..kept], &preferred[..kept]);
    }

    #[test]
    fn synthesized_slots_keep_anchor_minutes(
        preferred in prop::collection::vec(arb_clock(), 1..3),
        desired in 3usize..8,
        anchor in arb_clock(),
    ) {
        let planned = plan_times(&preferred, desired, anchor);
        for (k, slot) in planned.iter().enumerate().skip(preferred.len()) {
            let source = preferred[(k - preferred.len()) % preferred.len()];
            prop_assert_eq!(slot.minute(), source.minute());
        }
    }

    #[test]
    fn window_ends_are_always_quiet(start in arb_clock(), end in arb_clock()) {
        prop_assert!(is_quiet_hour(start, start, end));
        prop_assert!(is_quiet_hour(end, start, end));
    }

    #[test]
    fn delay_never_drops_below_floor(
        base in 0u32..10_000,
        correct in any::<bool>(),
        latency in -10_000i64..600_000,
    ) {
        prop_assert!(compute_next_delay(base, correct, latency) >= MIN_DELAY_MINUTES);
    }

    #[test]
    fn correct_answers_never_shorten_the_delay(
        base in 1u32..10_000,
        latency in 0i64..600_000,
    ) {
        prop_assert!(
            compute_next_delay(base, true, latency) >= compute_next_delay(base, false, latency)
        );
    }
}
