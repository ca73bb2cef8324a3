//! Fixed-delay retry policy for storage calls.
//!
//! Every storage interaction of the sequencer goes through
//! [`RetryPolicy::run`]. Transient errors are retried up to
//! [`max_attempts`](RetryPolicy::max_attempts) times with a fixed delay;
//! permanent errors end the loop at once. Both the attempt and the delay are
//! raced against a cancellation token so teardown never waits for a
//! misbehaving backend.
//!
//! What happens after the budget is spent depends on the caller and is
//! carried along in [`RetryError::Exhausted`] as an [`OnExhausted`] action.

use super::error::{SequencerError, StorageError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Default number of attempts for a storage call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay between attempts in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// What the caller does once a storage call has used up its retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnExhausted {
    /// Resynchronize the engine by replaying the PLog.
    Actualize,
    /// No safe state to return to; the engine is marked failed.
    Abort,
}

/// Outcome of a [`RetryPolicy::run`] that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// The cancellation token fired.
    Cancelled,
    /// Every attempt failed, or a permanent error was hit.
    Exhausted {
        /// The storage operation.
        operation: &'static str,
        /// Attempts made before giving up.
        attempts: u32,
        /// The escalation the caller asked for.
        action: OnExhausted,
        /// The last error returned by the storage adapter.
        source: StorageError,
    },
}

/// A bounded, fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Pause between attempts in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given budget.
    #[must_use]
    pub const fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
        }
    }

    /// The pause between attempts.
    #[must_use]
    #[inline]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Runs `op` until it succeeds, the budget is spent, a permanent error is
    /// returned, or `cancel` fires.
    ///
    /// A policy with `max_attempts == 0` still makes one attempt.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        action: OnExhausted,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                result = op() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() || attempt >= max_attempts {
                error!(
                    operation,
                    attempts = attempt,
                    error = %err,
                    action = ?action,
                    "storage operation failed, giving up"
                );
                return Err(RetryError::Exhausted {
                    operation,
                    attempts: attempt,
                    action,
                    source: err,
                });
            }

            warn!(
                attempt,
                max = max_attempts,
                operation,
                error = %err,
                "storage operation failed, retrying"
            );
            super::metrics::storage_retry(operation);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(self.delay()) => {}
            }
        }
    }
}

impl From<RetryError> for SequencerError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::Cancelled => SequencerError::Cancelled,
            RetryError::Exhausted {
                operation, attempts, ..
            } => SequencerError::TransactionAborted {
                operation,
                attempts,
            },
        }
    }
}
