//! Query counters and the sample stream.
//!
//! Counters are plain atomics and can be read at any time without blocking
//! writers. Samples go through a bounded channel with `try_send`: a full channel
//! drops the sample instead of stalling the caller.

use crate::db::driver::PoolStats;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Capacity of the sample channel.
pub const SAMPLE_CHANNEL_CAPACITY: usize = 100;

/// Timing of one executed statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStats {
    /// Statement text, or `BEGIN` / `COMMIT` / `ROLLBACK`
    pub query: String,
    /// Time spent in the database, retries included
    pub execution_time: Duration,
    /// Time spent waiting for a relay ticket
    pub queue_time: Duration,
    /// Whole transaction duration; only set for COMMIT and ROLLBACK
    pub transaction_time: Duration,
}

impl QueryStats {
    pub fn new(query: impl Into<String>, execution_time: Duration, queue_time: Duration) -> Self {
        Self {
            query: query.into(),
            execution_time,
            queue_time,
            transaction_time: Duration::ZERO,
        }
    }

    pub fn with_transaction_time(mut self, transaction_time: Duration) -> Self {
        self.transaction_time = transaction_time;
        self
    }
}

/// Receiving end of the sample stream.
pub type SampleReceiver = mpsc::Receiver<QueryStats>;

/// Point-in-time view of pool and relay counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub pool: PoolStats,
    pub in_progress_queries: i64,
    pub total_success_queries: u64,
    pub total_failed_queries: u64,
}

/// Shared counters of one client.
#[derive(Debug)]
pub struct StatsSampler {
    in_progress: AtomicI64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    sender: mpsc::Sender<QueryStats>,
    receiver: parking_lot::Mutex<Option<SampleReceiver>>,
}

impl StatsSampler {
    pub fn new() -> Self {
        Self::with_capacity(SAMPLE_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            in_progress: AtomicI64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            sender,
            receiver: parking_lot::Mutex::new(Some(receiver)),
        }
    }

    /// Publish a sample; dropped when the channel is full or nobody listens.
    pub fn sample(&self, sample: QueryStats) {
        let _ = self.sender.try_send(sample);
    }

    /// Take the sample receiver. Only the first caller gets it.
    pub fn take_receiver(&self) -> Option<SampleReceiver> {
        self.receiver.lock().take()
    }

    /// Count a finished call as a success or a failure.
    pub fn record<T, E>(&self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.succeeded.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Increment the in-progress counter and return the new value.
    ///
    /// The returned guard decrements it again when dropped.
    pub fn enter(self: &Arc<Self>) -> (InFlight, i64) {
        let now = self.in_progress.fetch_add(1, Ordering::AcqRel) + 1;
        (
            InFlight {
                stats: Arc::clone(self),
            },
            now,
        )
    }

    pub fn in_progress(&self) -> i64 {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, pool: PoolStats) -> Stats {
        Stats {
            pool,
            in_progress_queries: self.in_progress(),
            total_success_queries: self.succeeded(),
            total_failed_queries: self.failed(),
        }
    }
}

impl Default for StatsSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// One unit of the in-progress counter.
///
/// Held for the duration of a call, or for the lifetime of a transaction.
#[derive(Debug)]
pub struct InFlight {
    stats: Arc<StatsSampler>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.stats.in_progress.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_guard_decrements() {
        let stats = Arc::new(StatsSampler::new());
        let (first, n) = stats.enter();
        assert_eq!(n, 1);
        let (second, n) = stats.enter();
        assert_eq!(n, 2);
        drop(first);
        assert_eq!(stats.in_progress(), 1);
        drop(second);
        assert_eq!(stats.in_progress(), 0);
    }

    #[test]
    fn test_record_counts() {
        let stats = StatsSampler::new();
        stats.record::<(), ()>(&Ok(()));
        stats.record::<(), ()>(&Ok(()));
        stats.record::<(), ()>(&Err(()));
        assert_eq!(stats.succeeded(), 2);
        assert_eq!(stats.failed(), 1);
    }

    #[test]
    fn test_sample_burst_never_blocks() {
        let stats = StatsSampler::with_capacity(4);
        for i in 0..50 {
            stats.sample(QueryStats::new(format!("SELECT {}", i), Duration::ZERO, Duration::ZERO));
        }

        let mut rx = stats.take_receiver().unwrap();
        let mut received = Vec::new();
        while let Ok(sample) = rx.try_recv() {
            received.push(sample);
        }
        assert_eq!(received.len(), 4);
        assert_eq!(received[0].query, "SELECT 0");
    }

    #[test]
    fn test_receiver_taken_once() {
        let stats = StatsSampler::new();
        assert!(stats.take_receiver().is_some());
        assert!(stats.take_receiver().is_none());
        // publishing after the receiver is gone is still fine
        stats.sample(QueryStats::new("SELECT 1", Duration::ZERO, Duration::ZERO));
    }

    #[test]
    fn test_snapshot() {
        let stats = Arc::new(StatsSampler::new());
        let (_guard, _) = stats.enter();
        stats.record::<(), ()>(&Err(()));
        let snapshot = stats.snapshot(PoolStats::default());
        assert_eq!(snapshot.in_progress_queries, 1);
        assert_eq!(snapshot.total_failed_queries, 1);
        assert_eq!(snapshot.total_success_queries, 0);
    }

    #[test]
    fn test_transaction_time() {
        let sample = QueryStats::new("COMMIT", Duration::from_millis(2), Duration::ZERO)
            .with_transaction_time(Duration::from_secs(1));
        assert_eq!(sample.transaction_time, Duration::from_secs(1));
    }
}
