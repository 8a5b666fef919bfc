//! Line-delimited JSON envelopes exchanged with the network harness.
//!
//! Every frame is `{"src", "dest", "body"}` where `body` carries a `type`
//! tag, an optional `msg_id`, an optional `in_reply_to`, and the fields of
//! the message type. The same framing is used for client workload messages
//! (`send`, `poll`, ...) and for RPCs to the `lin-kv` service.

use std::collections::BTreeMap;
use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Message types this node accepts as requests.
pub const REQUEST_TYPES: &[&str] = &[
    "init",
    "send",
    "poll",
    "commit_offsets",
    "list_committed_offsets",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<B = Body> {
    pub src: String,
    pub dest: String,
    pub body: B,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Body {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(flatten)]
    pub payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Init {
        node_id: String,
        #[serde(default)]
        node_ids: Vec<String>,
    },
    InitOk,

    Send {
        key: String,
        msg: Value,
    },
    SendOk {
        offset: u64,
    },
    Poll {
        offsets: BTreeMap<String, i64>,
    },
    PollOk {
        msgs: BTreeMap<String, Vec<(u64, Value)>>,
    },
    CommitOffsets {
        offsets: BTreeMap<String, i64>,
    },
    CommitOffsetsOk,
    ListCommittedOffsets {
        keys: Vec<String>,
    },
    ListCommittedOffsetsOk {
        offsets: BTreeMap<String, i64>,
    },

    Read {
        key: String,
    },
    ReadOk {
        value: Value,
    },
    Write {
        key: String,
        value: Value,
    },
    WriteOk,
    Cas {
        key: String,
        from: Value,
        to: Value,
        #[serde(default)]
        create_if_not_exists: bool,
    },
    CasOk,

    Error {
        code: u32,
        #[serde(default)]
        text: String,
    },
}

impl Payload {
    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        Payload::Error {
            code: code.into(),
            text: text.into(),
        }
    }

    /// The `type` tag this payload serializes with.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Init { .. } => "init",
            Payload::InitOk => "init_ok",
            Payload::Send { .. } => "send",
            Payload::SendOk { .. } => "send_ok",
            Payload::Poll { .. } => "poll",
            Payload::PollOk { .. } => "poll_ok",
            Payload::CommitOffsets { .. } => "commit_offsets",
            Payload::CommitOffsetsOk => "commit_offsets_ok",
            Payload::ListCommittedOffsets { .. } => "list_committed_offsets",
            Payload::ListCommittedOffsetsOk { .. } => "list_committed_offsets_ok",
            Payload::Read { .. } => "read",
            Payload::ReadOk { .. } => "read_ok",
            Payload::Write { .. } => "write",
            Payload::WriteOk => "write_ok",
            Payload::Cas { .. } => "cas",
            Payload::CasOk => "cas_ok",
            Payload::Error { .. } => "error",
        }
    }
}

/// Error codes shared by every service on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Timeout,
    NotSupported,
    TemporarilyUnavailable,
    MalformedRequest,
    Crash,
    Abort,
    KeyDoesNotExist,
    PreconditionFailed,
}

impl ErrorCode {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(ErrorCode::Timeout),
            10 => Some(ErrorCode::NotSupported),
            11 => Some(ErrorCode::TemporarilyUnavailable),
            12 => Some(ErrorCode::MalformedRequest),
            13 => Some(ErrorCode::Crash),
            14 => Some(ErrorCode::Abort),
            20 => Some(ErrorCode::KeyDoesNotExist),
            22 => Some(ErrorCode::PreconditionFailed),
            _ => None,
        }
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Timeout => 0,
            ErrorCode::NotSupported => 10,
            ErrorCode::TemporarilyUnavailable => 11,
            ErrorCode::MalformedRequest => 12,
            ErrorCode::Crash => 13,
            ErrorCode::Abort => 14,
            ErrorCode::KeyDoesNotExist => 20,
            ErrorCode::PreconditionFailed => 22,
        }
    }
}

pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        let parsed = serde_json::from_str(trimmed).map_err(to_io_error)?;
        return Ok(Some(parsed));
    }
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    // The harness reads one frame per line, so flush after every message.
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
