use std::num::NonZeroUsize;

use crate::retry::RetryPolicy;

/// Largest batch a single `poll` returns per key unless configured otherwise.
pub const DEFAULT_MAX_POLL_BATCH: NonZeroUsize = match NonZeroUsize::new(5) {
    Some(n) => n,
    None => unreachable!(),
};

/// Tunables for a [`CommitLog`](crate::log::CommitLog).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Upper bound on entries returned per key by one poll.
    pub max_poll_batch: NonZeroUsize,
    /// Retry behavior for allocation, commits and store reads.
    pub retry: RetryPolicy,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_poll_batch: DEFAULT_MAX_POLL_BATCH,
            retry: RetryPolicy::default(),
        }
    }
}
