pub const DEFAULT_BASE_DELAY_MINUTES: u32 = 60;
pub const MIN_DELAY_MINUTES: u32 = 1;

const CORRECT_MULTIPLIER: f64 = 1.5;
const INCORRECT_MULTIPLIER: f64 = 0.7;
const FAST_RESPONSE_MULTIPLIER: f64 = 1.2;
const FAST_RESPONSE_THRESHOLD_MS: i64 = 5000;

/// Minutes to wait before the next prompt.
///
/// Multipliers apply in a fixed order: correctness first, then the fast
/// response boost. A sub-5s answer lengthens the delay whether it was right or
/// wrong, so "too easy" and "dismissed without reading" look the same here.
pub fn compute_next_delay(base_delay_minutes: u32, is_correct: bool, response_latency_ms: i64) -> u32 {
    let mut delay = base_delay_minutes as f64;

    delay *= if is_correct {
        CORRECT_MULTIPLIER
    } else {
        INCORRECT_MULTIPLIER
    };

    if response_latency_ms < FAST_RESPONSE_THRESHOLD_MS {
        delay *= FAST_RESPONSE_MULTIPLIER;
    }

    (delay.round() as u32).max(MIN_DELAY_MINUTES)
}
