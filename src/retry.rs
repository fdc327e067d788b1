//! Caller-owned retry of deferred probes.

use std::time::Duration;

use fastrand::Rng;
use tokio::time;
use tracing::{debug, warn};

use crate::ProbeOutcome;

/// Bounded exponential backoff with random jitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Probe attempts including the first one.
    pub max_attempts: usize,
    pub base_delay: Duration,
    /// Cap of the exponential part of the delay.
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to every delay (inclusive).
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(1),
            jitter: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the failed `attempt` (1-based).
    pub fn delay(&self, attempt: usize, rng: &mut Rng) -> Duration {
        let shift = attempt.saturating_sub(1).min(16) as u32;
        let base = self
            .base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay);
        let jitter_ms = rng.u64(..=self.jitter.as_millis() as u64);
        base + Duration::from_millis(jitter_ms)
    }
}

/// Run `probe` until it stops deferring or the attempts run out.
///
/// Returns the last outcome; `Deferred` means the policy gave up. Errors from
/// `probe` end the loop immediately.
pub async fn probe_with_backoff<F, E>(policy: &RetryPolicy, mut probe: F) -> Result<ProbeOutcome, E>
where
    F: FnMut() -> Result<ProbeOutcome, E>,
{
    let mut rng = Rng::new();
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let outcome = probe()?;
        if outcome != ProbeOutcome::Deferred {
            debug!(attempt, ?outcome, "probe settled");
            return Ok(outcome);
        }
        if attempt == attempts {
            break;
        }
        let delay = policy.delay(attempt, &mut rng);
        debug!(attempt, delay = ?delay, "probe deferred, backing off");
        time::sleep(delay).await;
    }
    warn!(attempts, "probe still deferred, giving up");
    Ok(ProbeOutcome::Deferred)
}
