//! Exponential backoff with symmetric jitter, and the non-blocking-try
//! fan-out gate (concurrency semaphore + admission rate limiter) that
//! bounds batch/scan/transact parallelism per §5's resource model.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use rand::Rng;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// `initial * factor^attempt`, clamped at `max`, jittered by up to ±50%.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub factor: f64,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            factor: 2.0,
            max: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw_secs = self.initial.as_secs_f64() * self.factor.powi(attempt as i32);
        let capped_secs = raw_secs.min(self.max.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(-0.5..=0.5);
        let jittered_secs = (capped_secs * (1.0 + jitter)).max(0.0);
        Duration::from_secs_f64(jittered_secs)
    }
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone, Error)]
pub enum ProtectionError {
    #[error("fan-out concurrency limit reached")]
    ConcurrencyExhausted,
    #[error("admission rate limit reached")]
    RateLimited,
}

/// Bounds concurrent fan-out with a semaphore and, optionally, throttles
/// admission with a token-bucket rate limiter. Both checks are
/// non-blocking-try: exhaustion returns an error rather than queuing the
/// caller.
pub struct FanOutGate {
    semaphore: Arc<Semaphore>,
    limiter: Option<Arc<DirectRateLimiter>>,
}

pub struct FanOutPermit(#[allow(dead_code)] OwnedSemaphorePermit);

impl FanOutGate {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            limiter: None,
        }
    }

    pub fn with_rate_limit(max_concurrency: usize, requests_per_second: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second.max(1)).unwrap());
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            limiter: Some(Arc::new(RateLimiter::direct(quota))),
        }
    }

    pub fn try_acquire(&self) -> Result<FanOutPermit, ProtectionError> {
        let permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| ProtectionError::ConcurrencyExhausted)?;
        if let Some(limiter) = &self.limiter {
            limiter.check().map_err(|_| ProtectionError::RateLimited)?;
        }
        Ok(FanOutPermit(permit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_clamped_at_max() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(100),
            factor: 10.0,
            max: Duration::from_secs(1),
            max_attempts: 10,
        };
        for attempt in 0..8 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay <= Duration::from_secs(2));
        }
    }

    #[test]
    fn gate_denies_beyond_concurrency_cap() {
        let gate = FanOutGate::new(1);
        let _first = gate.try_acquire().unwrap();
        let second = gate.try_acquire();
        assert!(matches!(second, Err(ProtectionError::ConcurrencyExhausted)));
    }
}
