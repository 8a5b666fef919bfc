//! Key-value storage backends for the log.
//!
//! The log keeps all of its state (offset counters, entries, commit marks)
//! in a flat key-value namespace behind the [`Storage`] trait. Two backends
//! implement it:
//!
//! - [`MemoryStore`]: a `Mutex<BTreeMap>` owned by one node. Nothing else can
//!   touch it, so a compare-and-swap only fails when the expected value is
//!   genuinely stale.
//! - [`LinKvStore`]: a client of the `lin-kv` service shared by every node.
//!   Compare-and-swap conflicts are routine here whenever two nodes write the
//!   same key.

mod lin_kv;
mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;

pub use lin_kv::{LIN_KV, LinKvStore, Rpc};
pub use memory::MemoryStore;

/// Result of a compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Swapped,
    /// The current value did not match `expected` (or the key was absent and
    /// creation was not requested).
    Conflict,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Returns the value under `key`, or `None` if it was never written.
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Overwrites `key` unconditionally.
    async fn write(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Atomically replaces `expected` with `new`.
    ///
    /// With `create_if_absent`, an absent key is created holding `new`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Value,
        new: Value,
        create_if_absent: bool,
    ) -> Result<CasOutcome, StoreError>;

    /// Reads an integer value, rejecting anything else as corrupt.
    async fn read_i64(&self, key: &str) -> Result<Option<i64>, StoreError> {
        match self.read(key).await? {
            None => Ok(None),
            Some(value) => match value.as_i64() {
                Some(n) => Ok(Some(n)),
                None => Err(StoreError::Corrupt {
                    key: key.to_string(),
                    expected: "integer",
                    value,
                }),
            },
        }
    }
}
