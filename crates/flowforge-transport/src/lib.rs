//! Stream transport abstraction (§4.1).
//!
//! Provides ordered, append-only streams identified by a string key, with
//! consumer groups giving at-most-one delivery per message per `(group,
//! consumer)` until acknowledged. Two drivers implement [`Transport`]:
//! [`inprocess::InProcessTransport`] for tests and single-process
//! deployments, and [`redis_driver::RedisTransport`] for a real broker.

pub mod inprocess;
pub mod redis_driver;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// Failure kinds every transport operation can surface (§4.1, §7).
/// `AlreadyExists` on group creation is non-fatal; `Disconnected` while
/// blocking on a read is retriable by the caller without message loss.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("disconnected: {0}")]
    Disconnected(String),
    #[error("timeout")]
    Timeout,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(String),
}

impl TransportError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Disconnected(_) => "disconnected",
            Self::Timeout => "timeout",
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::Protocol(_) => "protocol",
            Self::Io(_) => "io",
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Where a consumer group starts reading from when created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStart {
    /// Only messages appended after group creation.
    NewMessagesOnly,
    /// Every message currently in the stream.
    Beginning,
}

/// A single message read back from a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// Options for [`Transport::x_read_group`].
#[derive(Debug, Clone)]
pub struct ReadGroupOptions {
    /// Maximum messages to return.
    pub count: usize,
    /// Maximum time to block waiting for new messages when none are
    /// immediately available.
    pub block: std::time::Duration,
}

impl Default for ReadGroupOptions {
    fn default() -> Self {
        Self {
            count: 10,
            block: std::time::Duration::from_secs(1),
        }
    }
}

/// A pending (claimed, unacked) entry, as reported by `x_pending`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub idle: std::time::Duration,
    pub delivery_count: u64,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Idempotent; safe to call when already connected.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Idempotent; safe to call when already disconnected.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Append a message. `id` is `"*"` for server-assigned, or an explicit
    /// id. Durable before this returns.
    async fn x_add(
        &self,
        stream: &str,
        id: &str,
        fields: HashMap<String, String>,
    ) -> Result<String, TransportError>;

    /// Create a consumer group. Duplicate creation surfaces
    /// `TransportError::AlreadyExists`, which callers should swallow.
    async fn x_group_create(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<(), TransportError>;

    /// Read new messages (`>`) for `consumer` in `group`. May return an
    /// empty map if `options.block` elapses with nothing new — never
    /// silently drops a message.
    async fn x_read_group(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        options: ReadGroupOptions,
    ) -> Result<Vec<StreamMessage>, TransportError>;

    /// Acknowledge one message. Returns the number acked (0 or 1).
    async fn x_ack(&self, stream: &str, group: &str, id: &str) -> Result<u64, TransportError>;

    async fn x_range(
        &self,
        stream: &str,
        start: &str,
        end: &str,
        count: Option<usize>,
    ) -> Result<Vec<StreamMessage>, TransportError>;

    async fn x_len(&self, stream: &str) -> Result<u64, TransportError>;

    async fn x_pending(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<Vec<PendingEntry>, TransportError>;

    /// Reassign ownership of an idle pending entry to `consumer`.
    async fn x_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: std::time::Duration,
        id: &str,
    ) -> Result<Option<StreamMessage>, TransportError>;

    async fn del(&self, stream: &str) -> Result<(), TransportError>;

    /// Names of all consumer groups registered on `stream`.
    async fn x_info_groups(&self, stream: &str) -> Result<Vec<String>, TransportError>;
}
