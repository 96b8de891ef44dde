//! Retry backoff for failed jobs

use std::time::Duration;

/// Largest doubling applied to the base delay
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Delay before retrying a job whose `attempt`-th run just failed
///
/// Exponential: `base * 2^(attempt - 1)`, so with a one second base the
/// retries wait 1s, 2s, 4s, and so on.
///
/// # Arguments
///
/// * `base_ms` - Delay after the first failed attempt
/// * `attempt` - Number of the attempt that failed, starting at 1
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exponent))
}
