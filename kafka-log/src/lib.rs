//! Kafka-style commit log node.
//!
//! Each key names an independent log. Producers `send` payloads and get back
//! offsets `0, 1, 2, ...`; consumers `poll` bounded batches from an offset and
//! record progress with `commit_offsets`.
//!
//! The log runs on one of two storage backends, picked at startup:
//!
//! - **memory**: a private map. Fine for a single node.
//! - **lin-kv**: a shared linearizable key-value service. Offsets are claimed
//!   with compare-and-swap, so any number of nodes can append to the same key
//!   without handing out an offset twice.
//!
//! # Modules
//!
//! - [`log`]: append, poll, commit, and the offset allocator behind them
//! - [`storage`]: the [`storage::Storage`] trait and both backends
//! - [`retry`]: conflict/backoff loop shared by every CAS operation
//! - [`node`]: stdin/stdout runtime, RPC correlation, backend selection
//! - [`handlers`]: request decoding and dispatch
//! - [`message`]: JSON envelope types and line framing
//! - [`cli`]: command-line flags

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod log;
pub mod message;
pub mod node;
pub mod retry;
pub mod storage;

pub use config::LogConfig;
pub use error::{LogError, StoreError};
pub use log::{CommitLog, LogEntry};
pub use retry::RetryPolicy;
