use std::num::{NonZeroU32, NonZeroUsize};
use std::time::Duration;

use clap::Parser;

use crate::config::{DEFAULT_MAX_POLL_BATCH, LogConfig};
use crate::node::{Backend, ServeOptions};
use crate::retry::RetryPolicy;

/// Kafka-style commit log node speaking line-delimited JSON on stdin/stdout.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Where log state lives. Use `lin-kv` when running more than one node.
    #[arg(long, value_enum, default_value_t = Backend::Memory)]
    pub backend: Backend,

    /// Most entries returned per key by a single poll.
    #[arg(long, default_value_t = DEFAULT_MAX_POLL_BATCH)]
    pub max_poll_batch: NonZeroUsize,

    /// Give up on an operation after this many store attempts, the first one
    /// included. Unbounded if unset.
    #[arg(long)]
    pub max_attempts: Option<NonZeroU32>,

    /// Pause after a transient store failure, in milliseconds.
    #[arg(long, default_value_t = 20)]
    pub retry_backoff_ms: u64,

    /// How long to wait for a reply from the store, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub rpc_timeout_ms: u64,
}

impl Cli {
    pub fn serve_options(&self) -> ServeOptions {
        ServeOptions {
            backend: self.backend,
            log: LogConfig {
                max_poll_batch: self.max_poll_batch,
                retry: RetryPolicy {
                    max_attempts: self.max_attempts.map(NonZeroU32::get),
                    backoff: Duration::from_millis(self.retry_backoff_ms),
                },
            },
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
        }
    }
}
