use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::keys;
use crate::error::{Result, StoreError};
use crate::retry::{Attempt, RetryPolicy};
use crate::storage::{CasOutcome, Storage};

/// Hands out offsets by compare-and-swapping a per-key counter.
///
/// An offset is owned by exactly one caller once its CAS lands, so the
/// returned offsets for a key are `0, 1, 2, ...` with no repeats. Order
/// between concurrent callers is whoever wins the CAS, not arrival order.
pub struct OffsetAllocator {
    store: Arc<dyn Storage>,
    retry: RetryPolicy,
}

impl OffsetAllocator {
    pub fn new(store: Arc<dyn Storage>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Claims the next unused offset for `key`.
    pub async fn allocate(&self, key: &str) -> Result<u64> {
        let counter = keys::next_offset(key);
        let store = self.store.as_ref();
        let offset = self.retry.run(key, || try_claim(store, &counter)).await?;
        debug!(key, offset, "allocated offset");
        Ok(offset)
    }

    /// Offset the next append will receive; equivalently the log length.
    pub async fn next_offset(&self, key: &str) -> Result<u64> {
        let counter = keys::next_offset(key);
        let store = self.store.as_ref();
        self.retry.read(key, || read_counter(store, &counter)).await
    }
}

async fn try_claim(
    store: &dyn Storage,
    counter: &str,
) -> std::result::Result<Attempt<u64>, StoreError> {
    let current = read_counter(store, counter).await?;
    let outcome = store
        .compare_and_swap(counter, Value::from(current), Value::from(current + 1), true)
        .await?;
    Ok(match outcome {
        CasOutcome::Swapped => Attempt::Done(current),
        CasOutcome::Conflict => Attempt::Conflict,
    })
}

pub(super) async fn read_counter(
    store: &dyn Storage,
    counter: &str,
) -> std::result::Result<u64, StoreError> {
    match store.read_i64(counter).await? {
        None => Ok(0),
        Some(n) => u64::try_from(n).map_err(|_| StoreError::Corrupt {
            key: counter.to_string(),
            expected: "offset counter",
            value: Value::from(n),
        }),
    }
}
