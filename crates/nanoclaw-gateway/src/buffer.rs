//! Bounded reading buffer

use nanoclaw_core::prelude::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Result of admitting one reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Buffer size after the reading landed
    pub size: usize,
    /// Whether the oldest reading was evicted to make room
    pub evicted: bool,
}

/// Insertion-ordered holding area for readings awaiting batching
///
/// Every mutation takes the write lock for the in-memory change only, so an
/// enqueue either lands before a drain's snapshot or after it, never half way.
pub struct ReadingBuffer {
    readings: RwLock<VecDeque<Reading>>,
    capacity: usize,
    batch_threshold: usize,
    overflow: OverflowPolicy,
    evicted: AtomicU64,
    rejected: AtomicU64,
}

impl ReadingBuffer {
    pub fn new(capacity: usize, batch_threshold: usize, overflow: OverflowPolicy) -> Self {
        Self {
            readings: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            batch_threshold,
            overflow,
            evicted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Admit one validated reading
    ///
    /// On a full buffer the configured [`OverflowPolicy`] applies: the oldest
    /// reading is evicted, or the new one is refused with
    /// [`GatewayError::Backpressure`].
    pub async fn enqueue(&self, reading: Reading) -> Result<Admission> {
        let mut readings = self.readings.write().await;

        let mut evicted = false;
        if readings.len() >= self.capacity {
            match self.overflow {
                OverflowPolicy::EvictOldest => {
                    if let Some(oldest) = readings.pop_front() {
                        debug!(
                            node_id = oldest.node_id(),
                            capacity = self.capacity,
                            "Buffer full, evicted oldest reading"
                        );
                    }
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                    evicted = true;
                }
                OverflowPolicy::Reject => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        node_id = reading.node_id(),
                        capacity = self.capacity,
                        "Buffer full, rejecting reading"
                    );
                    return Err(GatewayError::backpressure(format!(
                        "reading buffer full ({} readings)",
                        self.capacity
                    )));
                }
            }
        }

        readings.push_back(reading);
        Ok(Admission {
            size: readings.len(),
            evicted,
        })
    }

    /// Remove and return every resident reading in insertion order
    pub async fn drain_all(&self) -> Vec<Reading> {
        let mut readings = self.readings.write().await;
        readings.drain(..).collect()
    }

    pub async fn size(&self) -> usize {
        self.readings.read().await.len()
    }

    pub async fn should_upload(&self) -> bool {
        self.size().await >= self.batch_threshold
    }

    /// Newest `limit` readings, oldest first
    pub async fn recent(&self, limit: usize) -> Vec<Reading> {
        let readings = self.readings.read().await;
        let skip = readings.len().saturating_sub(limit);
        readings.iter().skip(skip).cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn batch_threshold(&self) -> usize {
        self.batch_threshold
    }

    pub fn overflow(&self) -> OverflowPolicy {
        self.overflow
    }

    /// Readings lost to eviction since start
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Readings refused under the reject policy since start
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading(node: &str) -> Reading {
        ReadingInput::new(node, "temperature", 21.5, "C")
            .validate(Utc::now())
            .unwrap()
    }

    fn nodes(readings: &[Reading]) -> Vec<&str> {
        readings.iter().map(|r| r.node_id()).collect()
    }

    #[tokio::test]
    async fn test_drain_preserves_insertion_order() {
        let buffer = ReadingBuffer::new(10, 5, OverflowPolicy::EvictOldest);
        for node in ["a", "b", "c", "d"] {
            buffer.enqueue(reading(node)).await.unwrap();
        }

        let drained = buffer.drain_all().await;
        assert_eq!(nodes(&drained), vec!["a", "b", "c", "d"]);
        assert_eq!(buffer.size().await, 0);
        assert!(buffer.drain_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_overflow_evicts_oldest() {
        let buffer = ReadingBuffer::new(3, 2, OverflowPolicy::EvictOldest);
        for node in ["A", "B", "C"] {
            let admission = buffer.enqueue(reading(node)).await.unwrap();
            assert!(!admission.evicted);
        }
        let admission = buffer.enqueue(reading("D")).await.unwrap();
        assert_eq!(admission, Admission { size: 3, evicted: true });

        assert!(buffer.should_upload().await);
        assert_eq!(buffer.evicted_count(), 1);
        assert_eq!(nodes(&buffer.drain_all().await), vec!["B", "C", "D"]);
    }

    #[tokio::test]
    async fn test_overflow_keeps_last_capacity_readings() {
        let buffer = ReadingBuffer::new(4, 4, OverflowPolicy::EvictOldest);
        let names: Vec<String> = (0..11).map(|i| format!("n{}", i)).collect();
        for name in &names {
            buffer.enqueue(reading(name)).await.unwrap();
        }

        assert_eq!(buffer.size().await, 4);
        assert_eq!(buffer.evicted_count(), 7);
        assert_eq!(nodes(&buffer.drain_all().await), vec!["n7", "n8", "n9", "n10"]);
    }

    #[tokio::test]
    async fn test_overflow_reject_leaves_buffer_unchanged() {
        let buffer = ReadingBuffer::new(2, 2, OverflowPolicy::Reject);
        buffer.enqueue(reading("a")).await.unwrap();
        buffer.enqueue(reading("b")).await.unwrap();

        let err = buffer.enqueue(reading("c")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Backpressure { .. }));
        assert_eq!(buffer.rejected_count(), 1);
        assert_eq!(buffer.evicted_count(), 0);
        assert_eq!(nodes(&buffer.drain_all().await), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_should_upload_tracks_threshold() {
        let buffer = ReadingBuffer::new(10, 3, OverflowPolicy::EvictOldest);
        for i in 0..5 {
            assert_eq!(buffer.should_upload().await, buffer.size().await >= 3, "at size {}", i);
            buffer.enqueue(reading("n")).await.unwrap();
        }
        assert!(buffer.should_upload().await);
        buffer.drain_all().await;
        assert!(!buffer.should_upload().await);
    }

    #[tokio::test]
    async fn test_recent_returns_newest_window() {
        let buffer = ReadingBuffer::new(10, 5, OverflowPolicy::EvictOldest);
        for node in ["a", "b", "c", "d", "e"] {
            buffer.enqueue(reading(node)).await.unwrap();
        }

        assert_eq!(nodes(&buffer.recent(3).await), vec!["c", "d", "e"]);
        assert_eq!(buffer.recent(50).await.len(), 5);
        // non-mutating
        assert_eq!(buffer.size().await, 5);
    }
}
