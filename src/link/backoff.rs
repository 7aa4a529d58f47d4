//! Reconnect delay schedule.

use std::time::Duration;

/// First retry delay
const BASE_DELAY_MS: u64 = 100;

/// Delay before reconnect attempt `attempt` (1-based)
///
/// Exponential from 100 ms, doubling per attempt, capped at `cap_ms`.
///
/// # Examples
///
/// ```
/// use ddl_ground::link::backoff::retry_delay;
/// use std::time::Duration;
///
/// assert_eq!(retry_delay(1, 1000), Duration::from_millis(100));
/// assert_eq!(retry_delay(3, 1000), Duration::from_millis(400));
/// assert_eq!(retry_delay(8, 1000), Duration::from_millis(1000));
/// ```
pub fn retry_delay(attempt: u32, cap_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let shift = attempt.saturating_sub(1).min(30);
    let delay = BASE_DELAY_MS.saturating_mul(1u64 << shift);
    Duration::from_millis(delay.min(cap_ms))
}
