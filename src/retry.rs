//! Bounded retry with a fixed backoff delay.

use std::thread;
use std::time::Duration;

/// How a failed attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The condition may clear on its own; try again.
    Retry,
    /// Give up immediately.
    Fail,
}

/// Why a retried operation gave up.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// An attempt failed with an error classified as [`Verdict::Fail`].
    Fatal(E),
    /// Every attempt failed with a retryable error.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last: E,
    },
}

impl<E> RetryError<E> {
    /// The underlying error of the last attempt.
    pub fn into_inner(self) -> E {
        match self {
            Self::Fatal(err) | Self::Exhausted { last: err, .. } => err,
        }
    }
}

/// Attempt budget and delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Sleep between a retryable failure and the next attempt.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Policy for handing buffers to the driver at stream start.
    pub const QUEUE: Self = Self::new(5, Duration::from_millis(10));

    /// Create a policy. `max_attempts` of zero is treated as one.
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `op` until it succeeds, fails fatally, or the budget is spent.
    ///
    /// `op` receives the 1-based attempt number.
    pub fn run<T, E, Op, Classify>(&self, mut op: Op, classify: Classify) -> Result<T, RetryError<E>>
    where
        Op: FnMut(u32) -> Result<T, E>,
        Classify: Fn(&E) -> Verdict,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if classify(&err) == Verdict::Fail {
                        return Err(RetryError::Fatal(err));
                    }
                    if attempt >= attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                }
            }
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            attempt += 1;
        }
    }
}
