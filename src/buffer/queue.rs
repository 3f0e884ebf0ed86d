use super::batch::{Batch, DEFAULT_DESIRED_BATCH_SIZE, DEFAULT_MAX_BATCH_SIZE, outer_batch_size};
use crate::domain::Record;
use crate::sender::Consumer;
use std::collections::VecDeque;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// Flush attempts made by `close` and on drop before records are given up.
pub const CLOSE_FLUSH_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub max_batch_size: usize,
    pub max_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

/// Accumulates records and hands them to a consumer in bounded batches.
///
/// Records leave the queue only when a consumer accepted them. A failed
/// batch goes back to the front in its original order, so the next flush
/// retries it first.
///
/// Dropping a queue that still holds records drains it on a best-effort
/// basis. On a current-thread runtime that is not possible; call
/// [`EventQueue::close`] instead.
pub struct EventQueue<C: Consumer = Box<dyn Consumer>> {
    config: QueueConfig,
    queue: VecDeque<Record>,
    consumer: C,
    closed: bool,
}

impl<C: Consumer> EventQueue<C> {
    pub fn new(config: QueueConfig, consumer: C) -> Self {
        let config = QueueConfig {
            max_batch_size: config.max_batch_size.max(1),
            max_queue_size: config.max_queue_size.max(1),
        };
        debug!(
            consumer = consumer.name(),
            max_batch_size = config.max_batch_size,
            max_queue_size = config.max_queue_size,
            "Created event queue"
        );
        Self {
            queue: VecDeque::with_capacity(config.max_queue_size + 1),
            config,
            consumer,
            closed: false,
        }
    }

    /// Appends a record, flushing when the queue grows past `max_queue_size`.
    pub async fn enqueue(&mut self, record: Record) {
        self.queue.push_back(record);
        if self.queue.len() > self.config.max_queue_size {
            debug!(
                len = self.queue.len(),
                max_queue_size = self.config.max_queue_size,
                "Queue size exceeded, flushing"
            );
            self.flush().await;
        }
    }

    pub async fn enqueue_all<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = Record>,
    {
        for record in records {
            self.enqueue(record).await;
        }
    }

    pub async fn flush(&mut self) -> bool {
        self.flush_with(DEFAULT_DESIRED_BATCH_SIZE).await
    }

    /// Sends everything in batches of up to `desired_batch_size` per delivery
    /// unit. Stops at the first failed batch.
    pub async fn flush_with(&mut self, desired_batch_size: usize) -> bool {
        let desired = desired_batch_size.max(1);
        let threads = self.consumer.num_threads();

        while !self.queue.is_empty() {
            let size = outer_batch_size(
                self.queue.len(),
                desired,
                self.config.max_batch_size,
                threads,
            );
            let batch = Batch::new(self.queue.drain(..size).collect());
            debug!(
                consumer = self.consumer.name(),
                batch_id = batch.id(),
                records = batch.size(),
                remaining = self.queue.len(),
                "Persisting batch"
            );

            if !self.consumer.persist(&batch).await {
                let failed = batch.size();
                for record in batch.into_records().into_iter().rev() {
                    self.queue.push_front(record);
                }
                warn!(
                    consumer = self.consumer.name(),
                    failed,
                    queued = self.queue.len(),
                    "Batch delivery failed, records kept for retry"
                );
                return false;
            }
        }
        true
    }

    /// Discards queued records without sending them.
    pub fn reset(&mut self) {
        if !self.queue.is_empty() {
            debug!(discarded = self.queue.len(), "Queue reset");
        }
        self.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.queue.iter()
    }

    pub fn config(&self) -> QueueConfig {
        self.config
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    /// Flushes with bounded retries and returns whether nothing was lost.
    pub async fn close(mut self) -> bool {
        self.closed = true;
        self.drain().await
    }

    async fn drain(&mut self) -> bool {
        if self.queue.is_empty() {
            return true;
        }
        for attempt in 1..=CLOSE_FLUSH_ATTEMPTS {
            if self.flush().await {
                info!(consumer = self.consumer.name(), attempt, "Queue drained");
                return true;
            }
        }
        warn!(
            consumer = self.consumer.name(),
            dropped = self.queue.len(),
            attempts = CLOSE_FLUSH_ATTEMPTS,
            "Giving up on queued records"
        );
        self.queue.clear();
        false
    }
}

impl<C: Consumer> Drop for EventQueue<C> {
    fn drop(&mut self) {
        if self.closed || self.queue.is_empty() {
            return;
        }
        let pending = self.queue.len();

        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(self.drain()));
            }
            Ok(_) => {
                warn!(
                    pending,
                    "Event queue dropped on a current-thread runtime; call close() to deliver"
                );
            }
            Err(_) => match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => {
                    runtime.block_on(self.drain());
                }
                Err(e) => warn!(pending, error = %e, "Could not start a runtime to drain queue"),
            },
        }
    }
}

impl<C: Consumer> std::fmt::Debug for EventQueue<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("config", &self.config)
            .field("len", &self.queue.len())
            .field("consumer", &self.consumer.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::consumer::MockConsumer;
    use mockall::Sequence;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn records(n: usize) -> Vec<Record> {
        (0..n).map(|i| Record::new().with("i", i)).collect()
    }

    fn indices<'a>(records: impl IntoIterator<Item = &'a Record>) -> Vec<u64> {
        records
            .into_iter()
            .filter_map(|r| r.get("i").and_then(|v| v.as_u64()))
            .collect()
    }

    fn mock_consumer(threads: usize) -> MockConsumer {
        let mut consumer = MockConsumer::new();
        consumer.expect_num_threads().return_const(threads);
        consumer.expect_name().return_const("mock");
        consumer
    }

    #[tokio::test]
    async fn test_enqueue_below_limit_does_not_flush() {
        let mut consumer = mock_consumer(1);
        consumer.expect_persist().never();
        let mut queue = EventQueue::new(
            QueueConfig {
                max_batch_size: 50,
                max_queue_size: 10,
            },
            consumer,
        );

        queue.enqueue_all(records(10)).await;
        assert_eq!(queue.len(), 10);
        queue.reset();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_exceeding_queue_size_flushes_once() {
        let mut consumer = mock_consumer(1);
        consumer.expect_persist().times(1).returning(|batch| batch.size() == 5);
        let mut queue = EventQueue::new(
            QueueConfig {
                max_batch_size: 50,
                max_queue_size: 4,
            },
            consumer,
        );

        queue.enqueue_all(records(5)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_flush_preserves_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut consumer = mock_consumer(1);
        consumer.expect_persist().times(3).returning(move |batch| {
            sink.lock().extend(indices(batch.records()));
            batch.size() <= 10
        });
        let mut queue = EventQueue::new(QueueConfig::default(), consumer);

        queue.enqueue_all(records(25)).await;
        assert!(queue.flush_with(10).await);
        assert_eq!(*seen.lock(), (0..25).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_failed_batch_is_requeued_in_front() {
        let mut seq = Sequence::new();
        let mut consumer = mock_consumer(1);
        consumer
            .expect_persist()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| true);
        consumer
            .expect_persist()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| false);
        let mut queue = EventQueue::new(
            QueueConfig {
                max_batch_size: 5,
                max_queue_size: 100,
            },
            consumer,
        );

        queue.enqueue_all(records(12)).await;
        assert!(!queue.flush().await);
        assert_eq!(queue.len(), 7);
        assert_eq!(indices(queue.records()), (5..12).collect::<Vec<u64>>());
        queue.reset();
    }

    #[tokio::test]
    async fn test_retry_after_failure_delivers_without_duplicates() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        let mut seq = Sequence::new();
        let mut consumer = mock_consumer(1);
        consumer
            .expect_persist()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| false);
        consumer
            .expect_persist()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |batch| {
                sink.lock().extend(indices(batch.records()));
                true
            });
        let mut queue = EventQueue::new(QueueConfig::default(), consumer);

        queue.enqueue_all(records(8)).await;
        assert!(!queue.flush().await);
        assert_eq!(queue.len(), 8);
        assert!(queue.flush().await);
        assert!(queue.is_empty());
        assert_eq!(*delivered.lock(), (0..8).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_threads_scale_outer_batch() {
        let mut consumer = mock_consumer(4);
        consumer
            .expect_persist()
            .times(1)
            .returning(|batch| batch.size() == 130);
        let mut queue = EventQueue::new(QueueConfig::default(), consumer);

        queue.enqueue_all(records(130)).await;
        assert!(queue.flush().await);
    }

    #[tokio::test]
    async fn test_empty_flush_succeeds() {
        let mut consumer = mock_consumer(1);
        consumer.expect_persist().never();
        let mut queue = EventQueue::new(QueueConfig::default(), consumer);
        assert!(queue.flush().await);
    }

    #[tokio::test]
    async fn test_close_gives_up_after_bounded_attempts() {
        let mut consumer = mock_consumer(1);
        consumer
            .expect_persist()
            .times(CLOSE_FLUSH_ATTEMPTS)
            .returning(|_| false);
        let mut queue = EventQueue::new(QueueConfig::default(), consumer);

        queue.enqueue(Record::new().with("event", "lost")).await;
        assert!(!queue.close().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_drains_on_multi_thread_runtime() {
        let delivered = Arc::new(Mutex::new(0usize));
        let sink = delivered.clone();
        let mut consumer = mock_consumer(1);
        consumer.expect_persist().returning(move |batch| {
            *sink.lock() += batch.size();
            true
        });

        {
            let mut queue = EventQueue::new(QueueConfig::default(), consumer);
            queue.enqueue_all(records(3)).await;
        }
        assert_eq!(*delivered.lock(), 3);
    }

    #[test]
    fn test_drop_outside_runtime_drains() {
        let delivered = Arc::new(Mutex::new(0usize));
        let sink = delivered.clone();
        let mut consumer = mock_consumer(1);
        consumer.expect_persist().returning(move |batch| {
            *sink.lock() += batch.size();
            true
        });

        let mut queue = EventQueue::new(QueueConfig::default(), consumer);
        queue.queue.extend(records(2));
        drop(queue);
        assert_eq!(*delivered.lock(), 2);
    }
}
