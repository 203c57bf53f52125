//! Redis-streams-backed transport driver.
//!
//! Maps each [`Transport`] method onto the corresponding `XADD`/`XGROUP`/
//! `XREADGROUP`/`XACK`/... command, translating Redis error replies into
//! [`TransportError`] variants. `BUSYGROUP` on group creation is the one
//! error callers are expected to routinely swallow.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use tracing::{debug, warn};

use crate::{
    GroupStart, PendingEntry, ReadGroupOptions, StreamMessage, Transport, TransportError,
};

fn map_err(err: RedisError) -> TransportError {
    let msg = err.to_string();
    if msg.contains("BUSYGROUP") {
        TransportError::AlreadyExists(msg)
    } else if msg.contains("NOGROUP") || msg.contains("no such key") {
        TransportError::NotFound(msg)
    } else if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_io_error() {
        TransportError::Io(msg)
    } else {
        TransportError::Protocol(msg)
    }
}

/// Talks to a real Redis (or Redis-streams-compatible) broker.
pub struct RedisTransport {
    manager: ConnectionManager,
}

impl RedisTransport {
    pub async fn connect_url(url: &str) -> Result<Self, TransportError> {
        let client = redis::Client::open(url).map_err(map_err)?;
        let manager = client.get_connection_manager().await.map_err(map_err)?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn x_add(
        &self,
        stream: &str,
        id: &str,
        fields: HashMap<String, String>,
    ) -> Result<String, TransportError> {
        if fields.is_empty() {
            return Err(TransportError::Protocol("fields must not be empty".into()));
        }
        let items: Vec<(String, String)> = fields.into_iter().collect();
        let mut conn = self.manager.clone();
        conn.xadd(stream, id, &items).await.map_err(map_err)
    }

    async fn x_group_create(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<(), TransportError> {
        let start_id = match start {
            GroupStart::NewMessagesOnly => "$",
            GroupStart::Beginning => "0",
        };
        let mut conn = self.manager.clone();
        let result: Result<(), RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg(start_id)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        result.map_err(map_err)
    }

    async fn x_read_group(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        options: ReadGroupOptions,
    ) -> Result<Vec<StreamMessage>, TransportError> {
        let mut conn = self.manager.clone();
        let reply: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(options.count)
            .arg("BLOCK")
            .arg(options.block.as_millis() as i64)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;

        let mut out = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let mut fields = HashMap::new();
                for (field, value) in entry.map {
                    if let redis::Value::Data(bytes) = value {
                        fields.insert(field, String::from_utf8_lossy(&bytes).into_owned());
                    }
                }
                out.push(StreamMessage { id: entry.id, fields });
            }
        }
        Ok(out)
    }

    async fn x_ack(&self, stream: &str, group: &str, id: &str) -> Result<u64, TransportError> {
        let mut conn = self.manager.clone();
        conn.xack(stream, group, &[id]).await.map_err(map_err)
    }

    async fn x_range(
        &self,
        stream: &str,
        start: &str,
        end: &str,
        count: Option<usize>,
    ) -> Result<Vec<StreamMessage>, TransportError> {
        let mut conn = self.manager.clone();
        let reply: redis::streams::StreamRangeReply = match count {
            Some(n) => conn.xrange_count(stream, start, end, n).await,
            None => conn.xrange(stream, start, end).await,
        }
        .map_err(map_err)?;

        Ok(reply
            .ids
            .into_iter()
            .map(|entry| {
                let mut fields = HashMap::new();
                for (field, value) in entry.map {
                    if let redis::Value::Data(bytes) = value {
                        fields.insert(field, String::from_utf8_lossy(&bytes).into_owned());
                    }
                }
                StreamMessage { id: entry.id, fields }
            })
            .collect())
    }

    async fn x_len(&self, stream: &str) -> Result<u64, TransportError> {
        let mut conn = self.manager.clone();
        conn.xlen(stream).await.map_err(map_err)
    }

    async fn x_pending(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<Vec<PendingEntry>, TransportError> {
        let mut conn = self.manager.clone();
        let reply: redis::streams::StreamPendingCountReply = conn
            .xpending_count(stream, group, "-", "+", 1000)
            .await
            .map_err(map_err)?;

        Ok(reply
            .ids
            .into_iter()
            .map(|p| PendingEntry {
                id: p.id,
                consumer: p.consumer,
                idle: Duration::from_millis(p.last_delivered_ms as u64),
                delivery_count: p.times_delivered as u64,
            })
            .collect())
    }

    async fn x_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        id: &str,
    ) -> Result<Option<StreamMessage>, TransportError> {
        let mut conn = self.manager.clone();
        let reply: redis::streams::StreamClaimReply = conn
            .xclaim(
                stream,
                group,
                consumer,
                min_idle.as_millis() as i64,
                &[id],
            )
            .await
            .map_err(map_err)?;

        Ok(reply.ids.into_iter().next().map(|entry| {
            let mut fields = HashMap::new();
            for (field, value) in entry.map {
                if let redis::Value::Data(bytes) = value {
                    fields.insert(field, String::from_utf8_lossy(&bytes).into_owned());
                }
            }
            StreamMessage { id: entry.id, fields }
        }))
    }

    async fn del(&self, stream: &str) -> Result<(), TransportError> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(stream).await.map_err(map_err)?;
        Ok(())
    }

    async fn x_info_groups(&self, stream: &str) -> Result<Vec<String>, TransportError> {
        let mut conn = self.manager.clone();
        let reply: Vec<HashMap<String, redis::Value>> = match redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(stream)
            .query_async(&mut conn)
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                debug!(stream, error = %err, "xinfo groups failed, treating as no groups");
                return Ok(Vec::new());
            }
        };

        let mut names = Vec::new();
        for group in reply {
            if let Some(redis::Value::Data(bytes)) = group.get("name") {
                names.push(String::from_utf8_lossy(bytes).into_owned());
            } else {
                warn!(stream, "xinfo groups entry missing name field");
            }
        }
        Ok(names)
    }
}
