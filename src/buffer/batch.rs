use crate::domain::Record;
use std::time::Instant;
use uuid::Uuid;

/// Hard cap the collector accepts per request.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;

/// Batch size used by `EventQueue::flush` when the caller does not request one.
pub const DEFAULT_DESIRED_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct Batch {
    id: String,
    records: Vec<Record>,
    created_at: Instant,
}

impl Batch {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            records,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Splits into at most `parts` contiguous slices of `ceil(len / parts)`
    /// records each. The last slice may be shorter; no slice is empty.
    pub fn split(&self, parts: usize) -> Vec<&[Record]> {
        if self.records.is_empty() {
            return Vec::new();
        }
        let chunk = self.records.len().div_ceil(parts.max(1));
        self.records.chunks(chunk).collect()
    }
}

/// Number of records the queue slices off per flush iteration.
pub fn outer_batch_size(
    queue_len: usize,
    desired_batch_size: usize,
    max_batch_size: usize,
    num_threads: usize,
) -> usize {
    let threads = num_threads.max(1);
    queue_len
        .min(desired_batch_size.saturating_mul(threads))
        .min(max_batch_size.saturating_mul(threads))
}
