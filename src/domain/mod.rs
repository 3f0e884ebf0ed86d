//! Domain layer for rask-event-client.
//!
//! Contains the canonical types shared across all modules:
//! - `Record`: one event or profile mutation accepted by the queue
//! - `ClientError`: Top-level error type

pub mod error;
pub mod record;

pub use error::ClientError;
pub use record::Record;
