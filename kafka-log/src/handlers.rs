//! Turns inbound requests into log operations and replies.

use serde_json::Value;
use tracing::{debug, warn};

use crate::log::CommitLog;
use crate::message::{ErrorCode, Payload, REQUEST_TYPES};
use crate::node::{Node, Request};

/// Handles one request end to end, always sending exactly one reply.
pub async fn handle(node: &Node, log: &CommitLog, request: Request) {
    let reply = match decode(&request.body) {
        Ok(payload) => dispatch(node, log, payload).await,
        Err(error) => error,
    };

    if let Payload::Error { code, text } = &reply {
        warn!(src = %request.src, msg_id = ?request.msg_id, code, %text, "request failed");
    }
    if let Err(err) = node.reply(&request, reply) {
        warn!(src = %request.src, error = %err, "could not send reply");
    }
}

/// Parses a request body, telling unknown types apart from bad fields.
fn decode(body: &Value) -> Result<Payload, Payload> {
    let kind = body.get("type").and_then(Value::as_str).unwrap_or_default();
    if !REQUEST_TYPES.contains(&kind) {
        return Err(Payload::error(
            ErrorCode::NotSupported,
            format!("unsupported message type `{kind}`"),
        ));
    }
    serde_json::from_value(body.clone()).map_err(|err| {
        Payload::error(ErrorCode::MalformedRequest, format!("malformed `{kind}`: {err}"))
    })
}

async fn dispatch(node: &Node, log: &CommitLog, payload: Payload) -> Payload {
    let result = match payload {
        Payload::Init { node_id, node_ids } => {
            node.init(node_id, &node_ids);
            Ok(Payload::InitOk)
        }
        Payload::Send { key, msg } => log
            .append(&key, msg)
            .await
            .map(|offset| Payload::SendOk { offset }),
        Payload::Poll { offsets } => log.poll(&offsets).await.map(|batches| Payload::PollOk {
            msgs: batches
                .into_iter()
                .map(|(key, entries)| (key, entries.into_iter().map(Into::into).collect()))
                .collect(),
        }),
        Payload::CommitOffsets { offsets } => log
            .commit_offsets(&offsets)
            .await
            .map(|()| Payload::CommitOffsetsOk),
        Payload::ListCommittedOffsets { keys } => log
            .list_committed(keys.as_slice())
            .await
            .map(|offsets| Payload::ListCommittedOffsetsOk { offsets }),
        other => {
            debug!(kind = other.kind(), "request type has no handler");
            return Payload::error(
                ErrorCode::NotSupported,
                format!("`{}` is not a request", other.kind()),
            );
        }
    };

    result.unwrap_or_else(|err| Payload::error(err.error_code(), err.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unknown_types_are_not_supported() {
        let err = decode(&json!({"type": "topology", "msg_id": 1})).unwrap_err();
        assert!(matches!(err, Payload::Error { code: 10, .. }));

        let untyped = decode(&json!({"msg_id": 1})).unwrap_err();
        assert!(matches!(untyped, Payload::Error { code: 10, .. }));
    }

    #[test]
    fn bad_fields_are_malformed() {
        let err = decode(&json!({"type": "send", "msg": 1})).unwrap_err();
        assert!(matches!(err, Payload::Error { code: 12, .. }));

        let err = decode(&json!({"type": "poll", "offsets": {"k": "zero"}})).unwrap_err();
        assert!(matches!(err, Payload::Error { code: 12, .. }));
    }

    #[test]
    fn well_formed_requests_decode() {
        let payload = decode(&json!({
            "type": "commit_offsets",
            "msg_id": 4,
            "offsets": {"k1": 3, "k2": 0}
        }))
        .unwrap();

        assert_eq!(
            payload,
            Payload::CommitOffsets {
                offsets: [("k1".to_string(), 3), ("k2".to_string(), 0)].into(),
            }
        );
    }
}
