//! Node runtime: reads envelopes from the harness, runs handlers, and writes
//! replies.
//!
//! The runtime is split into three parts:
//!
//! - **Reader loop** ([`serve`]): parses one envelope per input line. Replies
//!   to our own RPCs complete a pending call; everything else becomes a
//!   handler task.
//! - **Handler tasks**: one per inbound request, see [`crate::handlers`].
//! - **Writer task**: the only owner of the output stream. Everyone else
//!   sends envelopes to it over an unbounded channel, so lines never
//!   interleave.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::LogConfig;
use crate::error::StoreError;
use crate::handlers;
use crate::log::CommitLog;
use crate::message::{Body, Envelope, Payload, read_message, write_message};
use crate::storage::{LinKvStore, MemoryStore, Rpc, Storage};

/// Which storage the log runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// Private in-process map; single node only.
    Memory,
    /// The shared `lin-kv` service; safe with many nodes.
    LinKv,
}

/// Everything [`serve`] needs to build a node.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub backend: Backend,
    pub log: LogConfig,
    /// How long an outbound RPC waits for its reply.
    pub rpc_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            log: LogConfig::default(),
            rpc_timeout: Duration::from_secs(1),
        }
    }
}

/// An inbound message that is not a reply to one of our RPCs.
#[derive(Debug)]
pub struct Request {
    pub src: String,
    pub msg_id: Option<u64>,
    pub body: Value,
}

/// Our side of the network: identity, outbound messages, pending RPCs.
pub struct Node {
    id: OnceLock<String>,
    next_msg_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    outbox: mpsc::UnboundedSender<Envelope>,
    rpc_timeout: Duration,
    closed: AtomicBool,
}

impl Node {
    pub fn new(outbox: mpsc::UnboundedSender<Envelope>, rpc_timeout: Duration) -> Self {
        Self {
            id: OnceLock::new(),
            next_msg_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbox,
            rpc_timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Our node id, or `""` before `init` arrives.
    pub fn id(&self) -> &str {
        self.id.get().map(String::as_str).unwrap_or_default()
    }

    /// Records the id assigned by `init`. Later `init`s are ignored.
    pub fn init(&self, node_id: String, node_ids: &[String]) {
        match self.id.set(node_id) {
            Ok(()) => info!(node = self.id(), cluster = ?node_ids, "node initialized"),
            Err(duplicate) => warn!(node = self.id(), %duplicate, "ignoring repeated init"),
        }
    }

    /// Answers `request` with `payload`.
    pub fn reply(&self, request: &Request, payload: Payload) -> Result<(), StoreError> {
        self.send(
            &request.src,
            Body {
                msg_id: Some(self.next_msg_id()),
                in_reply_to: request.msg_id,
                payload,
            },
        )
    }

    fn send(&self, dest: &str, body: Body) -> Result<(), StoreError> {
        let envelope = Envelope {
            src: self.id().to_string(),
            dest: dest.to_string(),
            body,
        };
        self.outbox
            .send(envelope)
            .map_err(|_| StoreError::Disconnected)
    }

    fn next_msg_id(&self) -> u64 {
        self.next_msg_id.fetch_add(1, Ordering::Relaxed)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hands a reply to whichever call is waiting for it.
    fn complete(&self, in_reply_to: u64, body: Value) {
        match self.pending().remove(&in_reply_to) {
            Some(waiter) => {
                // The caller may have timed out and left already.
                let _ = waiter.send(body);
            }
            None => debug!(in_reply_to, "dropping reply with no waiting call"),
        }
    }

    /// Fails every outstanding call and refuses new ones.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending().clear();
    }
}

#[async_trait]
impl Rpc for Node {
    async fn call(&self, dest: &str, request: Payload) -> Result<Payload, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Disconnected);
        }

        let msg_id = self.next_msg_id();
        let op = request.kind();
        let (tx, rx) = oneshot::channel();
        self.pending().insert(msg_id, tx);

        let body = Body {
            msg_id: Some(msg_id),
            in_reply_to: None,
            payload: request,
        };
        if let Err(err) = self.send(dest, body) {
            self.pending().remove(&msg_id);
            return Err(err);
        }

        match timeout(self.rpc_timeout, rx).await {
            Ok(Ok(reply)) => {
                serde_json::from_value(reply).map_err(|err| StoreError::UnexpectedReply {
                    op,
                    reply: err.to_string(),
                })
            }
            Ok(Err(_)) => Err(StoreError::Disconnected),
            Err(_) => {
                self.pending().remove(&msg_id);
                Err(StoreError::Unavailable(format!(
                    "no reply to {op} from {dest} within {:?}",
                    self.rpc_timeout
                )))
            }
        }
    }
}

/// Runs a node until `input` reaches end of file.
///
/// Handlers still running at EOF are allowed to finish and write their
/// replies; RPCs they have outstanding fail with
/// [`StoreError::Disconnected`].
pub async fn serve<R, W>(mut input: R, output: W, options: ServeOptions) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(output, outbox_rx));

    let node = Arc::new(Node::new(outbox_tx, options.rpc_timeout));
    let store: Arc<dyn Storage> = match options.backend {
        Backend::Memory => Arc::new(MemoryStore::new()),
        Backend::LinKv => Arc::new(LinKvStore::new(node.clone())),
    };
    let log = Arc::new(CommitLog::new(store, options.log));
    info!(backend = ?options.backend, "serving commit log");

    let mut tasks = JoinSet::new();
    loop {
        let envelope = match read_message::<_, Envelope<Value>>(&mut input).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => break,
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                warn!(error = %err, "skipping unparseable frame");
                continue;
            }
            Err(err) => return Err(err).context("failed to read from input"),
        };

        if let Some(in_reply_to) = envelope.body.get("in_reply_to").and_then(Value::as_u64) {
            node.complete(in_reply_to, envelope.body);
            continue;
        }

        let request = Request {
            msg_id: envelope.body.get("msg_id").and_then(Value::as_u64),
            src: envelope.src,
            body: envelope.body,
        };
        let node = Arc::clone(&node);
        let log = Arc::clone(&log);
        tasks.spawn(async move { handlers::handle(&node, &log, request).await });

        // Reap finished handlers so the set does not grow with uptime.
        while tasks.try_join_next().is_some() {}
    }

    debug!(in_flight = tasks.len(), "input closed, draining handlers");
    node.close();
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            warn!(error = %err, "handler task failed");
        }
    }

    // Dropping the last senders lets the writer drain and exit.
    drop(log);
    drop(node);
    writer.await.context("writer task panicked")?
}

async fn write_loop<W>(mut output: W, mut outbox: mpsc::UnboundedReceiver<Envelope>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(envelope) = outbox.recv().await {
        write_message(&mut output, &envelope)
            .await
            .context("failed to write to output")?;
    }
    Ok(())
}
