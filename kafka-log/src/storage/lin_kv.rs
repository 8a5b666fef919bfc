//! Storage backed by the shared `lin-kv` service.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{CasOutcome, Storage};
use crate::error::StoreError;
use crate::message::{ErrorCode, Payload};

/// Node id of the linearizable key-value service.
pub const LIN_KV: &str = "lin-kv";

/// Request/response channel to another node on the network.
///
/// Implemented by [`Node`](crate::node::Node); tests substitute a scripted
/// service.
#[async_trait]
pub trait Rpc: Send + Sync {
    /// Sends `request` to `dest` and waits for the matching reply.
    ///
    /// A reply that never arrives is reported as
    /// [`StoreError::Unavailable`].
    async fn call(&self, dest: &str, request: Payload) -> Result<Payload, StoreError>;
}

/// Client for `lin-kv`.
///
/// Holds no local state or lock: every call is one RPC and the service
/// orders them.
pub struct LinKvStore {
    rpc: Arc<dyn Rpc>,
}

impl LinKvStore {
    pub fn new(rpc: Arc<dyn Rpc>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl Storage for LinKvStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let request = Payload::Read {
            key: key.to_string(),
        };
        match self.rpc.call(LIN_KV, request).await? {
            Payload::ReadOk { value } => Ok(Some(value)),
            Payload::Error { code, .. }
                if ErrorCode::from_code(code) == Some(ErrorCode::KeyDoesNotExist) =>
            {
                Ok(None)
            }
            other => Err(reply_error("read", other)),
        }
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let request = Payload::Write {
            key: key.to_string(),
            value,
        };
        match self.rpc.call(LIN_KV, request).await? {
            Payload::WriteOk => Ok(()),
            other => Err(reply_error("write", other)),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Value,
        new: Value,
        create_if_absent: bool,
    ) -> Result<CasOutcome, StoreError> {
        let request = Payload::Cas {
            key: key.to_string(),
            from: expected,
            to: new,
            create_if_not_exists: create_if_absent,
        };
        match self.rpc.call(LIN_KV, request).await? {
            Payload::CasOk => Ok(CasOutcome::Swapped),
            Payload::Error { code, .. }
                if matches!(
                    ErrorCode::from_code(code),
                    Some(ErrorCode::PreconditionFailed | ErrorCode::KeyDoesNotExist)
                ) =>
            {
                Ok(CasOutcome::Conflict)
            }
            other => Err(reply_error("cas", other)),
        }
    }
}

fn reply_error(op: &'static str, reply: Payload) -> StoreError {
    match reply {
        Payload::Error { code, text } => match ErrorCode::from_code(code) {
            Some(ErrorCode::Timeout | ErrorCode::TemporarilyUnavailable | ErrorCode::Abort) => {
                StoreError::Unavailable(format!("{op} failed with code {code}: {text}"))
            }
            _ => StoreError::Rpc { op, code, text },
        },
        other => StoreError::UnexpectedReply {
            op,
            reply: other.kind().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    /// Answers every call with the next canned reply and records requests.
    struct Canned {
        replies: Mutex<Vec<Payload>>,
        seen: Mutex<Vec<(String, Payload)>>,
    }

    impl Canned {
        fn new(mut replies: Vec<Payload>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Rpc for Canned {
        async fn call(&self, dest: &str, request: Payload) -> Result<Payload, StoreError> {
            self.seen.lock().unwrap().push((dest.to_string(), request));
            Ok(self.replies.lock().unwrap().pop().expect("no canned reply left"))
        }
    }

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let rpc = Canned::new(vec![Payload::error(ErrorCode::KeyDoesNotExist, "missing")]);
        let store = LinKvStore::new(rpc.clone());

        assert_eq!(store.read("k").await.unwrap(), None);
        assert_eq!(
            rpc.seen.lock().unwrap()[0],
            (LIN_KV.to_string(), Payload::Read { key: "k".into() })
        );
    }

    #[tokio::test]
    async fn cas_sends_create_flag_and_maps_precondition_failure() {
        let rpc = Canned::new(vec![
            Payload::CasOk,
            Payload::error(ErrorCode::PreconditionFailed, "expected 0, had 1"),
        ]);
        let store = LinKvStore::new(rpc.clone());

        let first = store
            .compare_and_swap("n", json!(0), json!(1), true)
            .await
            .unwrap();
        let second = store
            .compare_and_swap("n", json!(0), json!(1), true)
            .await
            .unwrap();

        assert_eq!(first, CasOutcome::Swapped);
        assert_eq!(second, CasOutcome::Conflict);
        assert_eq!(
            rpc.seen.lock().unwrap()[0].1,
            Payload::Cas {
                key: "n".into(),
                from: json!(0),
                to: json!(1),
                create_if_not_exists: true,
            }
        );
    }

    #[tokio::test]
    async fn transient_codes_become_unavailable() {
        let rpc = Canned::new(vec![
            Payload::error(ErrorCode::TemporarilyUnavailable, "busy"),
            Payload::error(ErrorCode::Timeout, "slow"),
        ]);
        let store = LinKvStore::new(rpc);

        assert!(matches!(store.read("k").await, Err(StoreError::Unavailable(_))));
        assert!(matches!(
            store.write("k", json!(1)).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn other_failures_are_fatal() {
        let rpc = Canned::new(vec![
            Payload::error(ErrorCode::Crash, "boom"),
            Payload::SendOk { offset: 1 },
        ]);
        let store = LinKvStore::new(rpc);

        assert!(matches!(
            store.read("k").await,
            Err(StoreError::Rpc { op: "read", code: 13, .. })
        ));
        assert!(matches!(
            store.write("k", json!(1)).await,
            Err(StoreError::UnexpectedReply { op: "write", .. })
        ));
    }
}
