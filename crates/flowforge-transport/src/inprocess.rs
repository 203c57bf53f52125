//! In-process transport driver.
//!
//! Emulates a Redis-streams broker entirely in memory: same consumer-group
//! semantics, same error kinds. Used by tests and by single-process
//! deployments that don't want an external broker.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    GroupStart, PendingEntry, ReadGroupOptions, StreamMessage, Transport, TransportError,
};

struct Entry {
    id: String,
    fields: HashMap<String, String>,
}

struct Pending {
    entry_id: String,
    consumer: String,
    claimed_at: Instant,
    delivery_count: u64,
}

struct ConsumerGroup {
    /// Index into `Stream::entries` of the next entry this group hasn't
    /// yet delivered to any consumer.
    next_index: usize,
    pending: Vec<Pending>,
}

struct Stream {
    entries: Vec<Entry>,
    groups: HashMap<String, ConsumerGroup>,
    seq: u64,
}

impl Stream {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            groups: HashMap::new(),
            seq: 0,
        }
    }

    fn next_id(&mut self) -> String {
        self.seq += 1;
        format!("{}-0", self.seq)
    }
}

/// In-memory stand-in for a Redis-streams broker.
pub struct InProcessTransport {
    streams: RwLock<HashMap<String, Stream>>,
}

impl Default for InProcessTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
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
        let mut streams = self.streams.write();
        let s = streams.entry(stream.to_string()).or_insert_with(Stream::new);
        let assigned = if id == "*" {
            s.next_id()
        } else {
            id.to_string()
        };
        s.entries.push(Entry {
            id: assigned.clone(),
            fields,
        });
        Ok(assigned)
    }

    async fn x_group_create(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<(), TransportError> {
        let mut streams = self.streams.write();
        let s = streams.entry(stream.to_string()).or_insert_with(Stream::new);
        if s.groups.contains_key(group) {
            return Err(TransportError::AlreadyExists(format!(
                "group {group} already exists on {stream}"
            )));
        }
        let next_index = match start {
            GroupStart::NewMessagesOnly => s.entries.len(),
            GroupStart::Beginning => 0,
        };
        s.groups.insert(
            group.to_string(),
            ConsumerGroup {
                next_index,
                pending: Vec::new(),
            },
        );
        Ok(())
    }

    async fn x_read_group(
        &self,
        group: &str,
        consumer: &str,
        stream: &str,
        options: ReadGroupOptions,
    ) -> Result<Vec<StreamMessage>, TransportError> {
        let deadline = Instant::now() + options.block;
        loop {
            {
                let mut streams = self.streams.write();
                let s = streams
                    .get_mut(stream)
                    .ok_or_else(|| TransportError::NotFound(stream.to_string()))?;
                let cg = s
                    .groups
                    .get_mut(group)
                    .ok_or_else(|| TransportError::NotFound(format!("group {group}")))?;

                if cg.next_index < s.entries.len() {
                    let take = options.count.min(s.entries.len() - cg.next_index);
                    let mut out = Vec::with_capacity(take);
                    for entry in &s.entries[cg.next_index..cg.next_index + take] {
                        cg.pending.push(Pending {
                            entry_id: entry.id.clone(),
                            consumer: consumer.to_string(),
                            claimed_at: Instant::now(),
                            delivery_count: 1,
                        });
                        out.push(StreamMessage {
                            id: entry.id.clone(),
                            fields: entry.fields.clone(),
                        });
                    }
                    cg.next_index += take;
                    return Ok(out);
                }
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn x_ack(&self, stream: &str, group: &str, id: &str) -> Result<u64, TransportError> {
        let mut streams = self.streams.write();
        let s = streams
            .get_mut(stream)
            .ok_or_else(|| TransportError::NotFound(stream.to_string()))?;
        let cg = s
            .groups
            .get_mut(group)
            .ok_or_else(|| TransportError::NotFound(format!("group {group}")))?;
        let before = cg.pending.len();
        cg.pending.retain(|p| p.entry_id != id);
        Ok((before - cg.pending.len()) as u64)
    }

    async fn x_range(
        &self,
        stream: &str,
        start: &str,
        end: &str,
        count: Option<usize>,
    ) -> Result<Vec<StreamMessage>, TransportError> {
        let streams = self.streams.read();
        let Some(s) = streams.get(stream) else {
            return Ok(Vec::new());
        };
        let iter = s.entries.iter().filter(|e| {
            (start == "-" || e.id.as_str() >= start) && (end == "+" || e.id.as_str() <= end)
        });
        let msgs: Vec<StreamMessage> = match count {
            Some(n) => iter
                .take(n)
                .map(|e| StreamMessage {
                    id: e.id.clone(),
                    fields: e.fields.clone(),
                })
                .collect(),
            None => iter
                .map(|e| StreamMessage {
                    id: e.id.clone(),
                    fields: e.fields.clone(),
                })
                .collect(),
        };
        Ok(msgs)
    }

    async fn x_len(&self, stream: &str) -> Result<u64, TransportError> {
        let streams = self.streams.read();
        Ok(streams.get(stream).map(|s| s.entries.len() as u64).unwrap_or(0))
    }

    async fn x_pending(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<Vec<PendingEntry>, TransportError> {
        let streams = self.streams.read();
        let s = streams
            .get(stream)
            .ok_or_else(|| TransportError::NotFound(stream.to_string()))?;
        let cg = s
            .groups
            .get(group)
            .ok_or_else(|| TransportError::NotFound(format!("group {group}")))?;
        Ok(cg
            .pending
            .iter()
            .map(|p| PendingEntry {
                id: p.entry_id.clone(),
                consumer: p.consumer.clone(),
                idle: p.claimed_at.elapsed(),
                delivery_count: p.delivery_count,
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
        let mut streams = self.streams.write();
        let s = streams
            .get_mut(stream)
            .ok_or_else(|| TransportError::NotFound(stream.to_string()))?;
        let entry_fields = s
            .entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.fields.clone());
        let Some(fields) = entry_fields else {
            return Ok(None);
        };
        let cg = s
            .groups
            .get_mut(group)
            .ok_or_else(|| TransportError::NotFound(format!("group {group}")))?;
        if let Some(p) = cg.pending.iter_mut().find(|p| p.entry_id == id) {
            if p.claimed_at.elapsed() < min_idle {
                return Ok(None);
            }
            p.consumer = consumer.to_string();
            p.claimed_at = Instant::now();
            p.delivery_count += 1;
            return Ok(Some(StreamMessage {
                id: id.to_string(),
                fields,
            }));
        }
        Ok(None)
    }

    async fn del(&self, stream: &str) -> Result<(), TransportError> {
        self.streams.write().remove(stream);
        Ok(())
    }

    async fn x_info_groups(&self, stream: &str) -> Result<Vec<String>, TransportError> {
        let streams = self.streams.read();
        Ok(streams
            .get(stream)
            .map(|s| s.groups.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_then_read_group_delivers_once() {
        let t = InProcessTransport::new();
        t.x_group_create("req", "g1", GroupStart::NewMessagesOnly)
            .await
            .unwrap();
        let mut fields = HashMap::new();
        fields.insert("intent".into(), "implement".into());
        t.x_add("req", "*", fields).await.unwrap();

        let msgs = t
            .x_read_group("g1", "c1", "req", ReadGroupOptions::default())
            .await
            .unwrap();
        assert_eq!(msgs.len(), 1);

        let empty = t
            .x_read_group(
                "g1",
                "c1",
                "req",
                ReadGroupOptions {
                    count: 10,
                    block: Duration::from_millis(20),
                },
            )
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn duplicate_group_creation_is_already_exists() {
        let t = InProcessTransport::new();
        t.x_group_create("req", "g1", GroupStart::NewMessagesOnly)
            .await
            .unwrap();
        let err = t
            .x_group_create("req", "g1", GroupStart::NewMessagesOnly)
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn ack_removes_from_pending() {
        let t = InProcessTransport::new();
        t.x_group_create("req", "g1", GroupStart::NewMessagesOnly)
            .await
            .unwrap();
        let mut fields = HashMap::new();
        fields.insert("k".into(), "v".into());
        let id = t.x_add("req", "*", fields).await.unwrap();
        t.x_read_group("g1", "c1", "req", ReadGroupOptions::default())
            .await
            .unwrap();

        assert_eq!(t.x_pending("req", "g1").await.unwrap().len(), 1);
        let acked = t.x_ack("req", "g1", &id).await.unwrap();
        assert_eq!(acked, 1);
        assert!(t.x_pending("req", "g1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_empty_fields() {
        let t = InProcessTransport::new();
        let err = t.x_add("req", "*", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }
}
