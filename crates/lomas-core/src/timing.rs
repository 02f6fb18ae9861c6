//! Timing Shaper (TS): normalizes response latency so a caller cannot
//! distinguish a fast failure from a slow success by wall-clock time alone.

use std::time::{Duration, Instant};

use rand::Rng;

/// Which normalization mode is active, mirroring the `server.time_attack`
/// config keys `method`/`magnitude`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeAttackMode {
    /// Add a uniform delay in `[0, magnitude)` to every response.
    Jitter { magnitude: Duration },
    /// Pad every response to at least `target` total wall time since
    /// admission.
    Stall { target: Duration },
}

/// Wraps `tokio::time::sleep` around an already-computed outcome. `shape`
/// never inspects or alters `outcome` — it is a pure post-processing stage
/// applied identically to success and failure so timing carries no signal.
#[derive(Debug, Clone, Copy)]
pub struct TimingShaper {
    mode: Option<TimeAttackMode>,
}

impl TimingShaper {
    #[must_use]
    pub const fn new(mode: Option<TimeAttackMode>) -> Self {
        Self { mode }
    }

    #[must_use]
    pub const fn disabled() -> Self {
        Self { mode: None }
    }

    /// Await the residual delay implied by `admit_time` and the configured
    /// mode, then return `outcome` unchanged.
    pub async fn shape<T>(&self, admit_time: Instant, outcome: T) -> T {
        match self.mode {
            None => outcome,
            Some(TimeAttackMode::Jitter { magnitude }) => {
                let delay = if magnitude.is_zero() {
                    Duration::ZERO
                } else {
                    let secs = rand::thread_rng().gen_range(0.0..magnitude.as_secs_f64());
                    Duration::from_secs_f64(secs)
                };
                tokio::time::sleep(delay).await;
                outcome
            },
            Some(TimeAttackMode::Stall { target }) => {
                let elapsed = admit_time.elapsed();
                if elapsed < target {
                    tokio::time::sleep(target - elapsed).await;
                }
                outcome
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_shaper_returns_immediately() {
        let shaper = TimingShaper::disabled();
        let admit_time = Instant::now();
        let start = Instant::now();
        let out = shaper.shape(admit_time, 7).await;
        assert_eq!(out, 7);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn stall_pads_to_target_regardless_of_outcome() {
        let shaper = TimingShaper::new(Some(TimeAttackMode::Stall { target: Duration::from_millis(80) }));
        let admit_time = Instant::now();
        let out = shaper.shape(admit_time, Err::<(), &str>("fast failure")).await;
        assert_eq!(out, Err("fast failure"));
        assert!(admit_time.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn stall_does_not_shorten_a_slow_response() {
        let shaper = TimingShaper::new(Some(TimeAttackMode::Stall { target: Duration::from_millis(10) }));
        let admit_time = Instant::now() - Duration::from_millis(50);
        let start = Instant::now();
        shaper.shape(admit_time, ()).await;
        assert!(start.elapsed() < Duration::from_millis(20));
    }
}
