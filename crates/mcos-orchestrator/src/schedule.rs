//! Dead-letter backoff schedule for background jobs (spec §4.6, §7).
//!
//! "exponential backoff (500 ms, 1 s, 2 s, 4 s, 8 s, then dead-letter on the
//! 6th attempt)" — five retry delays between six total attempts.

use std::time::Duration;

/// Attempt count at which a job is dead-lettered instead of retried.
pub const MAX_ATTEMPTS: u32 = 6;

const DELAYS_MS: [u64; 5] = [500, 1_000, 2_000, 4_000, 8_000];

/// Delay to wait before retrying a job whose `attempt`'th try just failed.
/// `attempt` is 1-based; callers must not invoke this once `attempt >=
/// MAX_ATTEMPTS` — [`is_dead_letter`] guards that.
pub fn backoff_delay(attempt: u32) -> Duration {
    let idx = (attempt.saturating_sub(1) as usize).min(DELAYS_MS.len() - 1);
    Duration::from_millis(DELAYS_MS[idx])
}

/// True once a job has exhausted its retry budget and must be dead-lettered.
pub fn is_dead_letter(attempt: u32) -> bool {
    attempt >= MAX_ATTEMPTS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_matches_spec_sequence() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(3), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(4), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(5), Duration::from_millis(8_000));
    }

    #[test]
    fn sixth_attempt_is_dead_letter() {
        assert!(!is_dead_letter(5));
        assert!(is_dead_letter(6));
    }
}
