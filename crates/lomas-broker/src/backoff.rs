//! Backoff strategies for the admission engine's bounded CAS retry loops
//! (budget debit and compensation).

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fixed,
}

/// Delay before the given (1-based) attempt, capped at `max_delay_ms`.
#[must_use]
pub fn calculate_backoff(
    strategy: BackoffStrategy,
    attempt: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
) -> Duration {
    let delay_ms = match strategy {
        BackoffStrategy::Exponential => exponential(attempt, initial_delay_ms, max_delay_ms),
        BackoffStrategy::Linear => linear(attempt, initial_delay_ms, max_delay_ms),
        BackoffStrategy::Fixed => initial_delay_ms,
    };
    Duration::from_millis(delay_ms)
}

fn exponential(attempt: u32, initial_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let exponent = attempt.saturating_sub(1).min(63);
    initial_delay_ms.saturating_mul(2_u64.saturating_pow(exponent)).min(max_delay_ms)
}

fn linear(attempt: u32, initial_delay_ms: u64, max_delay_ms: u64) -> u64 {
    initial_delay_ms.saturating_mul(u64::from(attempt)).min(max_delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_then_caps() {
        assert_eq!(exponential(1, 100, 30_000), 100);
        assert_eq!(exponential(2, 100, 30_000), 200);
        assert_eq!(exponential(3, 100, 30_000), 400);
        assert_eq!(exponential(10, 100, 1_000), 1_000);
    }

    #[test]
    fn linear_backoff_scales_then_caps() {
        assert_eq!(linear(1, 100, 30_000), 100);
        assert_eq!(linear(3, 100, 30_000), 300);
        assert_eq!(linear(100, 100, 1_000), 1_000);
    }

    #[test]
    fn fixed_backoff_ignores_attempt() {
        let d = calculate_backoff(BackoffStrategy::Fixed, 9, 250, 30_000);
        assert_eq!(d.as_millis(), 250);
    }
}
