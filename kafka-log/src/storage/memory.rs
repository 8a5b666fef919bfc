//! In-process storage for a single-node log.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{CasOutcome, Storage};
use crate::error::StoreError;

/// Key-value map owned by one log service.
///
/// Every operation takes the lock for a single map access and releases it
/// before returning, so retry loops in the log layer never hold it across
/// an `.await`.
///
/// `BTreeMap` keeps [`MemoryStore::snapshot`] output ordered, which makes
/// test assertions and debug dumps stable.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            data: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns a copy of every key-value pair.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        // Each critical section is one map call, so a poisoned map is still whole.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Value,
        new: Value,
        create_if_absent: bool,
    ) -> Result<CasOutcome, StoreError> {
        let mut data = self.lock();
        match data.get_mut(key) {
            Some(current) if *current == expected => {
                *current = new;
                Ok(CasOutcome::Swapped)
            }
            Some(_) => Ok(CasOutcome::Conflict),
            None if create_if_absent => {
                data.insert(key.to_string(), new);
                Ok(CasOutcome::Swapped)
            }
            None => Ok(CasOutcome::Conflict),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn read_returns_none_for_unknown_keys() {
        let store = MemoryStore::new();
        assert_eq!(store.read("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_overwrites() {
        let store = MemoryStore::new();
        store.write("k", json!("a")).await.unwrap();
        store.write("k", json!("b")).await.unwrap();
        assert_eq!(store.read("k").await.unwrap(), Some(json!("b")));
    }

    #[tokio::test]
    async fn cas_swaps_only_on_match() {
        let store = MemoryStore::new();
        store.write("n", json!(1)).await.unwrap();

        let stale = store
            .compare_and_swap("n", json!(0), json!(5), false)
            .await
            .unwrap();
        assert_eq!(stale, CasOutcome::Conflict);
        assert_eq!(store.read("n").await.unwrap(), Some(json!(1)));

        let fresh = store
            .compare_and_swap("n", json!(1), json!(2), false)
            .await
            .unwrap();
        assert_eq!(fresh, CasOutcome::Swapped);
        assert_eq!(store.read("n").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn cas_on_absent_key_respects_create_flag() {
        let store = MemoryStore::new();

        let refused = store
            .compare_and_swap("n", json!(0), json!(1), false)
            .await
            .unwrap();
        assert_eq!(refused, CasOutcome::Conflict);
        assert!(store.snapshot().is_empty());

        let created = store
            .compare_and_swap("n", json!(0), json!(1), true)
            .await
            .unwrap();
        assert_eq!(created, CasOutcome::Swapped);
        assert_eq!(store.snapshot(), BTreeMap::from([("n".to_string(), json!(1))]));
    }

    #[tokio::test]
    async fn read_i64_flags_non_integers() {
        let store = MemoryStore::new();
        store.write("n", json!("seven")).await.unwrap();
        assert!(matches!(
            store.read_i64("n").await,
            Err(StoreError::Corrupt { expected: "integer", .. })
        ));
    }
}
