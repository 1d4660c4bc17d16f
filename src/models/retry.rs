use std::time::Duration;

/// Delay schedule between attempts. `attempt` is the 1-based number of the attempt that
/// just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `step * attempt`: 1s, 2s, 3s for a one second step.
    Linear { step: Duration },
    /// `base * 2^attempt`, capped at `max`: 2s, 4s, 8s for a one second base.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Linear { step } => step.saturating_mul(attempt),
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.min(31));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of invocations, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Spread each delay by up to ±10%.
    pub jitter: bool,
}

impl RetryConfig {
    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear { step },
            jitter: false,
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base, max },
            jitter: false,
        }
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}
