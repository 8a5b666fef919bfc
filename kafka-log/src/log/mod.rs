//! The commit log itself: append, poll, commit and list-committed over any
//! [`Storage`] backend.
//!
//! - [`allocator`] claims offsets with a CAS on a per-key counter.
//! - [`commit`] keeps per-key consumer marks that only move forward.
//! - [`keys`] fixes the storage key layout.
//!
//! Appends and polls live here because they are thin: an append is an
//! allocation plus one write, a poll is a counter read plus a few entry reads.

pub mod allocator;
pub mod commit;
pub mod keys;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::LogConfig;
use crate::error::{LogError, Result};
use crate::storage::Storage;

pub use allocator::OffsetAllocator;
pub use commit::CommitTracker;

/// One record in a key's log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub offset: u64,
    pub payload: Value,
}

impl From<LogEntry> for (u64, Value) {
    fn from(entry: LogEntry) -> Self {
        (entry.offset, entry.payload)
    }
}

/// A Kafka-style log partitioned by key.
///
/// Built once at startup around whichever backend the node runs with. All
/// state lives in the backend, so two `CommitLog`s over the same `lin-kv`
/// service see one shared log.
pub struct CommitLog {
    store: Arc<dyn Storage>,
    allocator: OffsetAllocator,
    commits: CommitTracker,
    config: LogConfig,
}

impl CommitLog {
    pub fn new(store: Arc<dyn Storage>, config: LogConfig) -> Self {
        Self {
            allocator: OffsetAllocator::new(Arc::clone(&store), config.retry.clone()),
            commits: CommitTracker::new(Arc::clone(&store), config.retry.clone()),
            store,
            config,
        }
    }

    /// Appends `payload` to `key`'s log and returns its offset.
    ///
    /// If the entry write fails after the offset was claimed, that offset
    /// stays empty for good; polls stop at it.
    pub async fn append(&self, key: &str, payload: Value) -> Result<u64> {
        let offset = self.allocator.allocate(key).await?;
        if let Err(err) = self.store.write(&keys::entry(key, offset), payload).await {
            warn!(key, offset, error = %err, "entry write failed, offset left empty");
            return Err(err.into());
        }
        Ok(offset)
    }

    /// Up to `max_poll_batch` entries of `key` starting at `start`.
    ///
    /// A negative `start` reads from the beginning. Reading stops early at
    /// the first entry that is not visible yet.
    pub async fn poll_key(&self, key: &str, start: i64) -> Result<Vec<LogEntry>> {
        let start = u64::try_from(start).unwrap_or(0);
        let end = self.allocator.next_offset(key).await?;
        if start >= end {
            return Ok(Vec::new());
        }

        let batch = self.config.max_poll_batch.get() as u64;
        let end = end.min(start.saturating_add(batch));
        let mut entries = Vec::with_capacity((end - start) as usize);
        for offset in start..end {
            let entry_key = keys::entry(key, offset);
            let store = self.store.as_ref();
            let payload = self.config.retry.read(key, || store.read(&entry_key)).await?;
            match payload {
                Some(payload) => entries.push(LogEntry { offset, payload }),
                None => {
                    debug!(key, offset, "entry not visible yet, truncating batch");
                    break;
                }
            }
        }
        Ok(entries)
    }

    /// Polls every key in `offsets` concurrently. Every requested key is
    /// present in the result, possibly with an empty batch.
    pub async fn poll(
        &self,
        offsets: &BTreeMap<String, i64>,
    ) -> Result<BTreeMap<String, Vec<LogEntry>>> {
        let batches = try_join_all(offsets.iter().map(|(key, start)| async move {
            let entries = self.poll_key(key, *start).await?;
            Ok::<_, LogError>((key.clone(), entries))
        }))
        .await?;
        Ok(batches.into_iter().collect())
    }

    pub async fn commit(&self, key: &str, offset: i64) -> Result<()> {
        self.commits.commit(key, offset).await
    }

    /// Commits each key independently; stops at the first failure.
    pub async fn commit_offsets(&self, offsets: &BTreeMap<String, i64>) -> Result<()> {
        for (key, offset) in offsets {
            self.commits.commit(key, *offset).await?;
        }
        Ok(())
    }

    pub async fn committed(&self, key: &str) -> Result<Option<i64>> {
        self.commits.committed(key).await
    }

    pub async fn list_committed<S>(&self, keys: &[S]) -> Result<BTreeMap<String, i64>>
    where
        S: AsRef<str>,
    {
        self.commits.list_committed(keys).await
    }
}
