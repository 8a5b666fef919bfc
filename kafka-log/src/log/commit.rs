use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::keys;
use crate::error::{Result, StoreError};
use crate::retry::{Attempt, RetryPolicy};
use crate::storage::{CasOutcome, Storage};

/// Stored-value stand-in for "nothing committed yet".
const NEVER_COMMITTED: i64 = -1;

/// Per-key consumer watermarks.
///
/// A mark only moves forward. Committing an offset at or below the current
/// mark succeeds without touching the store, so duplicate and reordered
/// commits are harmless.
pub struct CommitTracker {
    store: Arc<dyn Storage>,
    retry: RetryPolicy,
}

impl CommitTracker {
    pub fn new(store: Arc<dyn Storage>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Raises the mark for `key` to `offset` unless it is already there.
    pub async fn commit(&self, key: &str, offset: i64) -> Result<()> {
        let mark = keys::commit(key);
        let store = self.store.as_ref();
        let advanced = self.retry.run(key, || try_advance(store, &mark, offset)).await?;
        if advanced {
            debug!(key, offset, "advanced commit mark");
        }
        Ok(())
    }

    /// Current mark for `key`, or `None` if nothing was ever committed.
    pub async fn committed(&self, key: &str) -> Result<Option<i64>> {
        let mark = keys::commit(key);
        let store = self.store.as_ref();
        let current = self.retry.read(key, || store.read_i64(&mark)).await?;
        Ok(current.filter(|offset| *offset >= 0))
    }

    /// Marks for every key in `keys` that has one; the rest are left out.
    pub async fn list_committed<S>(&self, keys: &[S]) -> Result<BTreeMap<String, i64>>
    where
        S: AsRef<str>,
    {
        let mut marks = BTreeMap::new();
        for key in keys {
            let key = key.as_ref();
            if let Some(offset) = self.committed(key).await? {
                marks.insert(key.to_string(), offset);
            }
        }
        Ok(marks)
    }
}

async fn try_advance(
    store: &dyn Storage,
    mark: &str,
    offset: i64,
) -> std::result::Result<Attempt<bool>, StoreError> {
    // Re-checked on every attempt: a higher mark that landed meanwhile wins.
    let current = store.read_i64(mark).await?.unwrap_or(NEVER_COMMITTED);
    if offset <= current {
        return Ok(Attempt::Done(false));
    }

    let outcome = store
        .compare_and_swap(mark, Value::from(current), Value::from(offset), true)
        .await?;
    Ok(match outcome {
        CasOutcome::Swapped => Attempt::Done(true),
        CasOutcome::Conflict => Attempt::Conflict,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::MemoryStore;

    fn tracker(store: Arc<MemoryStore>) -> CommitTracker {
        CommitTracker::new(store, RetryPolicy::default())
    }

    #[tokio::test]
    async fn commits_never_move_backwards() {
        let tracker = tracker(Arc::new(MemoryStore::new()));

        tracker.commit("k", 7).await.unwrap();
        tracker.commit("k", 3).await.unwrap();
        tracker.commit("k", 7).await.unwrap();

        assert_eq!(tracker.committed("k").await.unwrap(), Some(7));

        tracker.commit("k", 9).await.unwrap();
        assert_eq!(tracker.committed("k").await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn stale_commit_leaves_store_untouched() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store.clone());

        tracker.commit("k", 4).await.unwrap();
        let before = store.snapshot();
        tracker.commit("k", 2).await.unwrap();

        assert_eq!(store.snapshot(), before);
        assert_eq!(before.get("commit:k"), Some(&json!(4)));
    }

    #[tokio::test]
    async fn negative_commit_on_fresh_key_records_nothing() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(store.clone());

        tracker.commit("k", -1).await.unwrap();

        assert!(store.snapshot().is_empty());
        assert_eq!(tracker.committed("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn commit_at_zero_counts_as_committed() {
        let tracker = tracker(Arc::new(MemoryStore::new()));

        tracker.commit("k", 0).await.unwrap();

        assert_eq!(
            tracker.list_committed(&["k"]).await.unwrap(),
            BTreeMap::from([("k".to_string(), 0)])
        );
    }

    #[tokio::test]
    async fn listing_skips_uncommitted_keys() {
        let tracker = tracker(Arc::new(MemoryStore::new()));
        tracker.commit("a", 2).await.unwrap();

        let listed = tracker.list_committed(&["a", "b"]).await.unwrap();

        assert_eq!(listed, BTreeMap::from([("a".to_string(), 2)]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_commits_settle_on_the_highest() {
        let tracker = Arc::new(tracker(Arc::new(MemoryStore::new())));
        let mut tasks = tokio::task::JoinSet::new();
        for offset in [5, 1, 9, 3, 8, 2] {
            let tracker = Arc::clone(&tracker);
            tasks.spawn(async move { tracker.commit("k", offset).await });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        assert_eq!(tracker.committed("k").await.unwrap(), Some(9));
    }
}
