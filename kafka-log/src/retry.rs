//! Retry loop shared by every read-modify-CAS operation.
//!
//! Two kinds of failure are retried, differently:
//!
//! - **Conflict**: another writer got there first. The next read sees its
//!   value, so the loop goes again immediately.
//! - **Unavailable**: the store could not answer. The loop sleeps for
//!   [`RetryPolicy::backoff`] first.
//!
//! Anything else ends the loop with the error.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{LogError, Result, StoreError};

/// How hard a log operation tries before giving up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed per operation. `None` retries forever; callers
    /// that need a deadline wrap the whole operation in a timeout.
    pub max_attempts: Option<u32>,
    /// Pause after a transient store failure.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff: Duration::from_millis(20),
        }
    }
}

/// Outcome of one attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Conflict,
}

impl RetryPolicy {
    pub fn bounded(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff,
        }
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    /// Runs `op` until it finishes, fails fatally, or the budget runs out.
    ///
    /// `key` only labels log lines and the exhaustion error.
    pub async fn run<T, F, Fut>(&self, key: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<Attempt<T>, StoreError>>,
    {
        let mut attempts = 0u32;
        loop {
            // Pinned at u32::MAX once reached; an unbounded policy keeps going.
            attempts = attempts.saturating_add(1);
            match op().await {
                Ok(Attempt::Done(value)) => return Ok(value),
                Ok(Attempt::Conflict) => {
                    debug!(key, attempts, "cas conflict, retrying");
                }
                Err(StoreError::Unavailable(reason)) => {
                    warn!(key, attempts, %reason, "store unavailable, backing off");
                    if !self.exhausted(attempts) {
                        sleep(self.backoff).await;
                    }
                }
                Err(err) => return Err(err.into()),
            }

            if self.exhausted(attempts) {
                return Err(LogError::RetriesExhausted {
                    key: key.to_string(),
                    attempts,
                });
            }
        }
    }

    /// Runs a single read, retrying only transient failures.
    pub async fn read<T, F, Fut>(&self, key: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, StoreError>>,
    {
        self.run(key, || {
            let fut = op();
            async move { fut.await.map(Attempt::Done) }
        })
        .await
    }
}
