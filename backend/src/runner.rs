//! Deadline-bounded execution of upstream calls.
//!
//! `BoundedRunner::run` races a call against a timer. The call receives a
//! `CancellationToken`; when the timer wins the token is cancelled first and
//! the call's future is dropped after, so nothing keeps running after `run`
//! returns.
//! When the call wins the timer is dropped and the token is left untouched.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Failure of a bounded call.
#[derive(Debug)]
pub enum RunError<E> {
    /// The deadline fired before the call settled.
    TimedOut(Duration),
    /// The call settled with its own error first.
    Failed(E),
}

impl<E: fmt::Display> fmt::Display for RunError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::TimedOut(deadline) => write!(f, "deadline of {:?} exceeded", deadline),
            RunError::Failed(e) => e.fmt(f),
        }
    }
}

impl<E: StdError + 'static> StdError for RunError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            RunError::TimedOut(_) => None,
            RunError::Failed(e) => Some(e),
        }
    }
}

/// Runs calls under a fixed wall-clock deadline.
#[derive(Debug, Clone, Copy)]
pub struct BoundedRunner {
    deadline: Duration,
}

impl BoundedRunner {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Start `call` and wait for it for at most the deadline.
    ///
    /// If the call and the timer are ready on the same poll, the call's
    /// outcome wins.
    pub async fn run<F, Fut, T, E>(&self, call: F) -> Result<T, RunError<E>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let token = CancellationToken::new();
        // Boxed so the call outlives the select and can be dropped after cancel.
        let mut call = Box::pin(call(token.clone()));

        tokio::select! {
            biased;
            outcome = &mut call => {
                tracing::debug!(elapsed_ms = %started.elapsed().as_millis(), ok = outcome.is_ok(), "Bounded call settled");
                outcome.map_err(RunError::Failed)
            }
            () = tokio::time::sleep(self.deadline) => {
                token.cancel();
                drop(call);
                tracing::warn!(deadline_ms = %self.deadline.as_millis(), "Bounded call timed out, cancelling");
                Err(RunError::TimedOut(self.deadline))
            }
        }
    }
}
