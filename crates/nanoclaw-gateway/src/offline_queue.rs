//! Offline queue for batches the coordinator did not accept

use chrono::{DateTime, Utc};
use nanoclaw_core::prelude::*;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Offline queue entry
///
/// Only `attempts` and `last_error` change after the entry is created.
#[derive(Debug, Clone)]
pub struct OfflineQueueEntry {
    /// Insertion-ordered id, unique for the process lifetime
    pub id: u64,
    pub batch: Arc<Batch>,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Result of handing a batch to the queue
#[derive(Debug, Clone)]
pub enum QueueAdmission {
    /// Appended at the tail; carries the entry evicted to make room, if any
    Queued {
        id: u64,
        evicted: Option<OfflineQueueEntry>,
    },
    /// Queue full under the reject policy; the batch was not kept
    Rejected,
}

/// Counts from one retry pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub attempted: usize,
    pub uploaded: usize,
    pub failed: usize,
    pub dropped: usize,
}

/// Bounded FIFO of failed batches awaiting retry
///
/// Entries live in insertion order keyed by a monotonically increasing id, so
/// a retry pass can release the lock around each upload and find its entry
/// again afterwards.
pub struct OfflineQueue {
    entries: RwLock<VecDeque<OfflineQueueEntry>>,
    next_id: AtomicU64,
    capacity: usize,
    overflow: OverflowPolicy,
    evicted: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
}

impl OfflineQueue {
    pub fn new(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            capacity,
            overflow,
            evicted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    /// Append a batch that failed its first upload
    pub async fn enqueue(&self, batch: Arc<Batch>, error: impl Into<String>) -> QueueAdmission {
        let mut entries = self.entries.write().await;

        let mut evicted = None;
        if entries.len() >= self.capacity {
            match self.overflow {
                OverflowPolicy::EvictOldest => {
                    evicted = entries.pop_front();
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                    if let Some(ref old) = evicted {
                        warn!(
                            entry_id = old.id,
                            batch_id = %old.batch.batch_id(),
                            readings = old.batch.len(),
                            capacity = self.capacity,
                            "Offline queue full, evicted oldest batch"
                        );
                    }
                }
                OverflowPolicy::Reject => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        batch_id = %batch.batch_id(),
                        readings = batch.len(),
                        capacity = self.capacity,
                        "Offline queue full, rejecting batch"
                    );
                    return QueueAdmission::Rejected;
                }
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entries.push_back(OfflineQueueEntry {
            id,
            batch,
            enqueued_at: Utc::now(),
            attempts: 1,
            last_error: Some(error.into()),
        });

        QueueAdmission::Queued { id, evicted }
    }

    /// Attempt every entry present when the pass starts, head to tail
    ///
    /// Success removes the entry. A permanent failure removes the entry and
    /// counts it as dropped. Any other failure bumps its attempt count and
    /// leaves it in place; the pass carries on with later entries. The lock
    /// is not held while `upload` runs.
    pub async fn retry_all<F, Fut>(&self, mut upload: F) -> RetryReport
    where
        F: FnMut(Arc<Batch>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let pending: Vec<(u64, Arc<Batch>)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|e| (e.id, e.batch.clone()))
            .collect();

        let mut report = RetryReport::default();

        for (id, batch) in pending {
            report.attempted += 1;
            let result = upload(batch).await;

            let mut entries = self.entries.write().await;
            let position = entries.binary_search_by_key(&id, |e| e.id).ok();

            match result {
                Ok(()) => {
                    report.uploaded += 1;
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    if let Some(pos) = position {
                        entries.remove(pos);
                    }
                    debug!(entry_id = id, "Queued batch delivered");
                }
                Err(e) if e.is_permanent() => {
                    report.dropped += 1;
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    if let Some(pos) = position {
                        entries.remove(pos);
                    }
                    warn!(entry_id = id, error = %e, "Dropping queued batch after permanent failure");
                }
                Err(e) => {
                    report.failed += 1;
                    if let Some(entry) = position.and_then(|pos| entries.get_mut(pos)) {
                        entry.attempts += 1;
                        entry.last_error = Some(e.to_string());
                        debug!(entry_id = id, attempts = entry.attempts, error = %e, "Queued batch still failing");
                    }
                }
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                uploaded = report.uploaded,
                failed = report.failed,
                dropped = report.dropped,
                "Offline queue retry pass finished"
            );
        }

        report
    }

    pub async fn size(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Copy of the current entries, head first
    pub async fn snapshot(&self) -> Vec<OfflineQueueEntry> {
        self.entries.read().await.iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overflow(&self) -> OverflowPolicy {
        self.overflow
    }

    /// Batches lost to eviction since start
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Batches refused under the reject policy since start
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Queued batches removed after a permanent failure since start
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queued batches delivered by retry passes since start
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn batch(node: &str) -> Arc<Batch> {
        let reading = ReadingInput::new(node, "temperature", 20.0, "C")
            .validate(Utc::now())
            .unwrap();
        Arc::new(Batch::form("gw", vec![reading]).unwrap())
    }

    fn first_node(entry: &OfflineQueueEntry) -> &str {
        entry.batch.readings()[0].node_id()
    }

    #[tokio::test]
    async fn test_overflow_evicts_oldest_batch() {
        let queue = OfflineQueue::new(2, OverflowPolicy::EvictOldest);
        queue.enqueue(batch("one"), "down").await;
        queue.enqueue(batch("two"), "down").await;

        match queue.enqueue(batch("three"), "down").await {
            QueueAdmission::Queued { evicted: Some(old), .. } => assert_eq!(first_node(&old), "one"),
            other => panic!("expected eviction, got {other:?}"),
        }

        let snapshot = queue.snapshot().await;
        let order: Vec<&str> = snapshot.iter().map(first_node).collect();
        assert_eq!(order, vec!["two", "three"]);
        assert_eq!(queue.evicted_count(), 1);
    }

    #[tokio::test]
    async fn test_overflow_reject_keeps_existing() {
        let queue = OfflineQueue::new(1, OverflowPolicy::Reject);
        queue.enqueue(batch("one"), "down").await;

        assert!(matches!(
            queue.enqueue(batch("two"), "down").await,
            QueueAdmission::Rejected
        ));
        assert_eq!(queue.size().await, 1);
        assert_eq!(first_node(&queue.snapshot().await[0]), "one");
        assert_eq!(queue.rejected_count(), 1);
    }

    #[tokio::test]
    async fn test_successful_retry_removes_entry_once() {
        let queue = OfflineQueue::new(10, OverflowPolicy::EvictOldest);
        queue.enqueue(batch("one"), "down").await;

        let report = queue.retry_all(|_| async { Ok(()) }).await;
        assert_eq!(report, RetryReport { attempted: 1, uploaded: 1, failed: 0, dropped: 0 });
        assert!(queue.is_empty().await);
        assert_eq!(queue.delivered_count(), 1);

        // never retried again
        let report = queue.retry_all(|_| async { Ok(()) }).await;
        assert_eq!(report.attempted, 0);
    }

    #[tokio::test]
    async fn test_failing_entry_does_not_block_later_ones() {
        let queue = OfflineQueue::new(10, OverflowPolicy::EvictOldest);
        let stuck = batch("stuck");
        let stuck_id = stuck.batch_id();
        queue.enqueue(stuck, "down").await;
        queue.enqueue(batch("b"), "down").await;
        queue.enqueue(batch("c"), "down").await;

        let mut seen = Vec::new();
        let report = queue
            .retry_all(|b| {
                seen.push(b.batch_id());
                let fail = b.batch_id() == stuck_id;
                async move {
                    if fail {
                        Err(GatewayError::coordinator("still down"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(seen.len(), 3);
        assert_eq!(report, RetryReport { attempted: 3, uploaded: 2, failed: 1, dropped: 0 });

        let remaining = queue.snapshot().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].batch.batch_id(), stuck_id);
        assert_eq!(remaining[0].attempts, 2);
        assert!(remaining[0].last_error.as_deref().unwrap().contains("still down"));
    }

    #[tokio::test]
    async fn test_permanent_failure_drops_entry() {
        let queue = OfflineQueue::new(10, OverflowPolicy::EvictOldest);
        queue.enqueue(batch("bad"), "down").await;

        let report = queue
            .retry_all(|_| async {
                Err(GatewayError::Serialization {
                    message: "malformed".into(),
                    source: None,
                })
            })
            .await;

        assert_eq!(report.dropped, 1);
        assert_eq!(report.failed, 0);
        assert!(queue.is_empty().await);
        assert_eq!(queue.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_uncategorised_failure_keeps_entry() {
        let queue = OfflineQueue::new(10, OverflowPolicy::EvictOldest);
        queue.enqueue(batch("odd"), "down").await;

        let report = queue
            .retry_all(|_| async { Err(GatewayError::Internal("uploader glitch".to_string())) })
            .await;

        assert_eq!(report, RetryReport { attempted: 1, uploaded: 0, failed: 1, dropped: 0 });
        let remaining = queue.snapshot().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].attempts, 2);
        assert!(remaining[0].last_error.as_deref().unwrap().contains("uploader glitch"));
        assert_eq!(queue.dropped_count(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_during_pass_is_not_attempted() {
        let queue = Arc::new(OfflineQueue::new(10, OverflowPolicy::EvictOldest));
        queue.enqueue(batch("first"), "down").await;

        let q = queue.clone();
        let mut attempted: HashSet<Uuid> = HashSet::new();
        let report = queue
            .retry_all(|b| {
                attempted.insert(b.batch_id());
                let q = q.clone();
                async move {
                    q.enqueue(batch("late"), "down").await;
                    Err(GatewayError::coordinator("down"))
                }
            })
            .await;

        assert_eq!(report.attempted, 1);
        assert_eq!(attempted.len(), 1);
        assert_eq!(queue.size().await, 2);
    }

    #[tokio::test]
    async fn test_ids_increase_in_insertion_order() {
        let queue = OfflineQueue::new(10, OverflowPolicy::EvictOldest);
        for node in ["a", "b", "c"] {
            queue.enqueue(batch(node), "down").await;
        }
        let ids: Vec<u64> = queue.snapshot().await.iter().map(|e| e.id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }
}
