pub mod batch;
pub mod queue;

pub use batch::{Batch, DEFAULT_DESIRED_BATCH_SIZE, DEFAULT_MAX_BATCH_SIZE, outer_batch_size};
pub use queue::{CLOSE_FLUSH_ATTEMPTS, DEFAULT_MAX_QUEUE_SIZE, EventQueue, QueueConfig};
