//! Admin log transport seam.
//!
//! The admin log is a single-partition, infinitely retained journal of
//! control operations, one per cluster. The consumer side exposes
//! subscribe/poll/unsubscribe; the administrative side creates the topic
//! and pins its retention. Both are traits so that production can wire a
//! real partitioned-log client while tests and local mode run against the
//! in-memory log below.

use crate::core::error::{StrataError, StrataResult};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// The admin log always lives on partition 0 of its topic.
pub const ADMIN_LOG_PARTITION: u32 = 0;

/// Name of a cluster's admin topic.
pub fn admin_topic_name(cluster: &str) -> String {
    format!("strata_admin_{cluster}")
}

/// Record key. Carries the transport-level control-marker flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecordKey {
    /// Transport control markers are skipped by the consumer.
    pub control: bool,
}

/// Envelope message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Put,
    Delete,
    ControlMessage,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Put => write!(f, "Put"),
            Self::Delete => write!(f, "Delete"),
            Self::ControlMessage => write!(f, "ControlMessage"),
        }
    }
}

/// Record envelope: message type, payload schema id, payload bytes.
#[derive(Debug, Clone)]
pub struct LogEnvelope {
    pub message_type: MessageType,
    pub schema_id: i32,
    pub payload: Bytes,
}

/// One record polled from the admin log.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: LogRecordKey,
    pub envelope: LogEnvelope,
}

/// Consumer surface of the admin log transport.
pub trait AdminLogConsumer: Send + Sync {
    /// Begin consumption of a topic partition at the given offset.
    /// Records with offsets >= `offset` will be delivered by `poll`.
    fn subscribe(&self, topic: &str, partition: u32, offset: u64) -> StrataResult<()>;

    /// Stop consumption of a topic partition.
    fn unsubscribe(&self, topic: &str, partition: u32) -> StrataResult<()>;

    /// Fetch available records. Non-blocking after `timeout`; returns an
    /// empty batch when nothing new is available. Offsets within a batch
    /// are strictly increasing.
    fn poll(&self, timeout: Duration) -> StrataResult<Vec<LogRecord>>;
}

/// Administrative surface of the admin log transport.
pub trait AdminLogAdmin: Send + Sync {
    fn contains_topic(&self, topic: &str) -> StrataResult<bool>;

    fn create_topic(&self, topic: &str, partitions: u32, replication_factor: u32)
        -> StrataResult<()>;

    /// Pin the topic's retention to unbounded. The admin log is the
    /// cluster's source of truth for replay; it must never expire records.
    fn update_retention_infinite(&self, topic: &str) -> StrataResult<()>;
}

/// In-memory admin log implementing both transport surfaces.
#[derive(Default)]
pub struct MemoryAdminLog {
    inner: Mutex<MemoryAdminLogInner>,
}

#[derive(Default)]
struct MemoryAdminLogInner {
    topics: HashMap<String, Vec<(LogRecordKey, LogEnvelope)>>,
    infinite_retention: HashSet<String>,
    subscription: Option<Subscription>,
}

struct Subscription {
    topic: String,
    partition: u32,
    next_offset: u64,
}

impl MemoryAdminLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record; returns its offset.
    pub fn append(&self, topic: &str, key: LogRecordKey, envelope: LogEnvelope) -> u64 {
        let mut inner = self.inner.lock();
        let records = inner.topics.entry(topic.to_string()).or_default();
        let offset = records.len() as u64;
        records.push((key, envelope));
        offset
    }

    /// Whether retention was pinned to unbounded for a topic.
    pub fn retention_is_infinite(&self, topic: &str) -> bool {
        self.inner.lock().infinite_retention.contains(topic)
    }

    /// Whether a subscription is currently active.
    pub fn is_subscribed(&self) -> bool {
        self.inner.lock().subscription.is_some()
    }
}

impl AdminLogConsumer for MemoryAdminLog {
    fn subscribe(&self, topic: &str, partition: u32, offset: u64) -> StrataResult<()> {
        let mut inner = self.inner.lock();
        if !inner.topics.contains_key(topic) {
            return Err(StrataError::transport(format!(
                "cannot subscribe to unknown topic {topic}"
            )));
        }
        inner.subscription = Some(Subscription {
            topic: topic.to_string(),
            partition,
            next_offset: offset,
        });
        Ok(())
    }

    fn unsubscribe(&self, topic: &str, partition: u32) -> StrataResult<()> {
        let mut inner = self.inner.lock();
        if let Some(sub) = &inner.subscription {
            if sub.topic == topic && sub.partition == partition {
                inner.subscription = None;
            }
        }
        Ok(())
    }

    fn poll(&self, _timeout: Duration) -> StrataResult<Vec<LogRecord>> {
        let mut inner = self.inner.lock();
        let Some(sub) = inner.subscription.as_ref() else {
            return Err(StrataError::transport("poll without subscription"));
        };
        let topic = sub.topic.clone();
        let partition = sub.partition;
        let from = sub.next_offset;

        let records = inner.topics.get(&topic).cloned().unwrap_or_default();
        let mut batch = Vec::new();
        for (idx, (key, envelope)) in records.iter().enumerate().skip(from as usize) {
            batch.push(LogRecord {
                topic: topic.clone(),
                partition,
                offset: idx as u64,
                key: key.clone(),
                envelope: envelope.clone(),
            });
        }
        if let Some(sub) = inner.subscription.as_mut() {
            sub.next_offset = records.len() as u64;
        }
        Ok(batch)
    }
}

impl AdminLogAdmin for MemoryAdminLog {
    fn contains_topic(&self, topic: &str) -> StrataResult<bool> {
        Ok(self.inner.lock().topics.contains_key(topic))
    }

    fn create_topic(
        &self,
        topic: &str,
        _partitions: u32,
        _replication_factor: u32,
    ) -> StrataResult<()> {
        self.inner.lock().topics.entry(topic.to_string()).or_default();
        Ok(())
    }

    fn update_retention_infinite(&self, topic: &str) -> StrataResult<()> {
        let mut inner = self.inner.lock();
        if !inner.topics.contains_key(topic) {
            return Err(StrataError::transport(format!(
                "cannot update retention of unknown topic {topic}"
            )));
        }
        inner.infinite_retention.insert(topic.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_envelope(payload: &[u8]) -> LogEnvelope {
        LogEnvelope {
            message_type: MessageType::Put,
            schema_id: 1,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn test_append_and_poll_from_offset() {
        let log = MemoryAdminLog::new();
        log.create_topic("t", 1, 1).unwrap();
        for i in 0..5u8 {
            log.append("t", LogRecordKey::default(), put_envelope(&[i]));
        }

        log.subscribe("t", ADMIN_LOG_PARTITION, 2).unwrap();
        let batch = log.poll(Duration::from_millis(10)).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].offset, 2);
        assert_eq!(batch[2].offset, 4);

        // Nothing new until another append.
        assert!(log.poll(Duration::from_millis(10)).unwrap().is_empty());
        log.append("t", LogRecordKey::default(), put_envelope(&[9]));
        let batch = log.poll(Duration::from_millis(10)).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].offset, 5);
    }

    #[test]
    fn test_subscribe_unknown_topic() {
        let log = MemoryAdminLog::new();
        assert!(log.subscribe("missing", 0, 0).is_err());
    }

    #[test]
    fn test_resubscribe_redelivers() {
        let log = MemoryAdminLog::new();
        log.create_topic("t", 1, 1).unwrap();
        log.append("t", LogRecordKey::default(), put_envelope(b"a"));
        log.append("t", LogRecordKey::default(), put_envelope(b"b"));

        log.subscribe("t", 0, 0).unwrap();
        assert_eq!(log.poll(Duration::from_millis(1)).unwrap().len(), 2);

        log.unsubscribe("t", 0).unwrap();
        assert!(!log.is_subscribed());
        log.subscribe("t", 0, 0).unwrap();
        assert_eq!(log.poll(Duration::from_millis(1)).unwrap().len(), 2);
    }

    #[test]
    fn test_retention_pinning() {
        let log = MemoryAdminLog::new();
        log.create_topic("t", 1, 3).unwrap();
        assert!(!log.retention_is_infinite("t"));
        log.update_retention_infinite("t").unwrap();
        assert!(log.retention_is_infinite("t"));
        assert!(log.update_retention_infinite("missing").is_err());
    }
}
