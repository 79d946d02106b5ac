use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::model::QueueMessage;

use super::error::{QueueError, Result};
use super::keys::{encode_seq_key, NEXT_SEQ_KEY};

pub const MAX_RETRIES: u32 = 3;

/// A queued message plus the delivery bookkeeping the worker needs to
/// enforce the retry budget. `attempts` travels with the
/// envelope itself rather than as a broker-attached header, since there is
/// no external broker here to attach one at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,
    pub message: QueueMessage,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEnvelope {
    pub seq: u64,
    pub message: Option<QueueMessage>,
    pub failure_code: String,
    pub failure_message: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// Outcome of [`FjallQueue::dequeue`]: either a well-formed envelope, or a
/// pending entry whose body didn't parse as JSON.
#[derive(Debug, Clone)]
pub enum Dequeued {
    Envelope(Envelope),
    Poison(u64),
}

/// Durable FIFO queue, backed by Fjall. Three partitions:
/// `pending` (FIFO-ordered by zero-padded sequence key), `dlq` (dead
/// letters), and `metadata` (just the `next_seq` counter, so it survives
/// restarts).
#[derive(Clone)]
pub struct FjallQueue {
    keyspace: Arc<Keyspace>,
    pending: PartitionHandle,
    dlq: PartitionHandle,
    metadata: PartitionHandle,
    seq_counter: Arc<AtomicU64>,
    name: String,
    dlq_name: String,
}

impl FjallQueue {
    pub fn open<P: AsRef<Path>>(path: P, name: &str, dlq_name: &str) -> Result<Self> {
        let path = path.as_ref();
        let existed = path.exists();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let pending = keyspace.open_partition("pending", PartitionCreateOptions::default())?;
        let dlq = keyspace.open_partition("dlq", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        let next_seq = match metadata.get(NEXT_SEQ_KEY)? {
            Some(bytes) => String::from_utf8_lossy(&bytes).parse::<u64>().unwrap_or(0),
            None => 0,
        };

        if existed {
            info!(queue = name, dlq = dlq_name, next_seq, "attached to existing queue keyspace");
        } else {
            info!(queue = name, dlq = dlq_name, "declared fresh queue keyspace");
        }

        Ok(Self {
            keyspace: Arc::new(keyspace),
            pending,
            dlq,
            metadata,
            seq_counter: Arc::new(AtomicU64::new(next_seq)),
            name: name.to_string(),
            dlq_name: dlq_name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dlq_name(&self) -> &str {
        &self.dlq_name
    }

    /// `publish` — appends a message to the tail of `pending`. Callers
    /// retry transient failures with the bounded backoff schedule below
    /// (5 attempts, 1/2/4/8/16s); this call itself is a single attempt.
    pub fn publish(&self, message: QueueMessage) -> Result<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = Envelope {
            seq,
            message,
            attempts: 0,
            enqueued_at: Utc::now(),
        };
        let value = serde_json::to_vec(&envelope)?;
        self.pending.insert(encode_seq_key(seq), value)?;
        self.metadata.insert(NEXT_SEQ_KEY, seq.to_string().as_bytes())?;
        Ok(seq)
    }

    /// `dequeue` — returns the lowest-sequence pending entry without
    /// removing it (removal only happens on `ack`/`move_to_dlq`, so a
    /// crash between dequeue and ack leaves the message available for
    /// redelivery, matching prefetch = 1 semantics). An entry whose body
    /// does not parse as JSON is returned as [`Dequeued::Poison`] rather
    /// than silently skipped, so the caller can route it to the DLQ
    /// (the "poison message" path) instead of leaving it stuck at
    /// the head of the queue forever.
    pub fn dequeue(&self) -> Result<Option<Dequeued>> {
        for kv in self.pending.iter() {
            let (key, value) = kv?;
            let seq = match super::keys::decode_seq_key(&key) {
                Some(seq) => seq,
                None => continue,
            };
            return Ok(Some(match serde_json::from_slice::<Envelope>(&value) {
                Ok(envelope) => Dequeued::Envelope(envelope),
                Err(err) => {
                    warn!(seq, error = %err, "dequeued a poison (non-JSON) queue entry");
                    Dequeued::Poison(seq)
                }
            }));
        }
        Ok(None)
    }

    /// `ack` — positively acknowledge: remove the message permanently.
    pub fn ack(&self, seq: u64) -> Result<()> {
        self.pending.remove(encode_seq_key(seq))?;
        Ok(())
    }

    /// `nack_requeue` — increment the attempt counter and leave the
    /// message at its existing position (still FIFO by original sequence).
    pub fn nack_requeue(&self, seq: u64) -> Result<Envelope> {
        let key = encode_seq_key(seq);
        let bytes = self.pending.get(&key)?.ok_or(QueueError::TaskNotFound(seq))?;
        let mut envelope: Envelope = serde_json::from_slice(&bytes)?;
        envelope.attempts += 1;
        self.pending.insert(&key, serde_json::to_vec(&envelope)?)?;
        Ok(envelope)
    }

    /// `move_to_dlq` — remove from `pending`, record a dead-letter entry.
    /// Used both for malformed messages (no `Envelope` to recover, hence
    /// `message: None`) and for retry-budget exhaustion.
    pub fn move_to_dlq(
        &self,
        seq: u64,
        message: Option<QueueMessage>,
        attempts: u32,
        failure_code: &str,
        failure_message: &str,
    ) -> Result<()> {
        self.pending.remove(encode_seq_key(seq))?;
        let entry = DeadLetterEnvelope {
            seq,
            message,
            failure_code: failure_code.to_string(),
            failure_message: failure_message.to_string(),
            attempts,
            failed_at: Utc::now(),
        };
        self.dlq.insert(encode_seq_key(seq), serde_json::to_vec(&entry)?)?;
        Ok(())
    }

    pub fn depth(&self) -> Result<usize> {
        Ok(self.pending.len()?)
    }

    pub fn dlq_depth(&self) -> Result<usize> {
        Ok(self.dlq.len()?)
    }

    pub fn list_dlq(&self, limit: usize) -> Result<Vec<DeadLetterEnvelope>> {
        let mut out = Vec::with_capacity(limit);
        for kv in self.dlq.iter().take(limit) {
            let (_, value) = kv?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    pub fn health_check(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::Buffer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn open_test_queue() -> (FjallQueue, TempDir) {
        let dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(dir.path().join("queue"), "malscan.jobs", "malscan-dlq").unwrap();
        (queue, dir)
    }

    fn sample_message() -> QueueMessage {
        QueueMessage {
            job_id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            storage_key: "deadbeef".to_string(),
            sha256: "deadbeef".to_string(),
            original_filename: "sample.bin".to_string(),
        }
    }

    #[test]
    fn publish_assigns_sequential_ids() {
        let (queue, _dir) = open_test_queue();
        let first = queue.publish(sample_message()).unwrap();
        let second = queue.publish(sample_message()).unwrap();
        assert_eq!(second, first + 1);
    }

    #[test]
    fn dequeue_returns_fifo_order() {
        let (queue, _dir) = open_test_queue();
        let first = queue.publish(sample_message()).unwrap();
        let _second = queue.publish(sample_message()).unwrap();
        let head = match queue.dequeue().unwrap().unwrap() {
            Dequeued::Envelope(envelope) => envelope,
            Dequeued::Poison(seq) => panic!("unexpected poison entry at seq {seq}"),
        };
        assert_eq!(head.seq, first);
    }

    #[test]
    fn dequeue_surfaces_poison_entry_without_removing_it() {
        let (queue, _dir) = open_test_queue();
        let seq = queue.seq_counter.fetch_add(1, Ordering::SeqCst) + 1;
        queue.pending.insert(encode_seq_key(seq), b"not-json").unwrap();

        match queue.dequeue().unwrap().unwrap() {
            Dequeued::Poison(poison_seq) => assert_eq!(poison_seq, seq),
            Dequeued::Envelope(_) => panic!("expected a poison entry"),
        }

        queue
            .move_to_dlq(seq, None, 0, "POISON", "message body was not valid JSON")
            .unwrap();
        assert!(queue.dequeue().unwrap().is_none());
        assert_eq!(queue.list_dlq(10).unwrap()[0].failure_code, "POISON");
    }

    #[test]
    fn ack_removes_message() {
        let (queue, _dir) = open_test_queue();
        let seq = queue.publish(sample_message()).unwrap();
        queue.ack(seq).unwrap();
        assert!(queue.dequeue().unwrap().is_none());
    }

    #[test]
    fn nack_requeue_increments_attempts_and_preserves_position() {
        let (queue, _dir) = open_test_queue();
        let seq = queue.publish(sample_message()).unwrap();
        let envelope = queue.nack_requeue(seq).unwrap();
        assert_eq!(envelope.attempts, 1);
        let head = match queue.dequeue().unwrap().unwrap() {
            Dequeued::Envelope(envelope) => envelope,
            Dequeued::Poison(seq) => panic!("unexpected poison entry at seq {seq}"),
        };
        assert_eq!(head.seq, seq);
        assert_eq!(head.attempts, 1);
    }

    #[test]
    fn move_to_dlq_removes_from_pending_and_records_entry() {
        let (queue, _dir) = open_test_queue();
        let seq = queue.publish(sample_message()).unwrap();
        queue
            .move_to_dlq(seq, Some(sample_message()), MAX_RETRIES, "MAX_RETRIES", "Max retries exceeded: 3 attempts")
            .unwrap();
        assert!(queue.dequeue().unwrap().is_none());
        let dlq = queue.list_dlq(10).unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].failure_code, "MAX_RETRIES");
    }

    #[test]
    fn sequence_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue");
        {
            let queue = FjallQueue::open(&path, "malscan.jobs", "malscan-dlq").unwrap();
            queue.publish(sample_message()).unwrap();
            queue.publish(sample_message()).unwrap();
            queue.persist().unwrap();
        }
        let queue = FjallQueue::open(&path, "malscan.jobs", "malscan-dlq").unwrap();
        let seq = queue.publish(sample_message()).unwrap();
        assert_eq!(seq, 3);
    }
}
