use thiserror::Error;

use crate::app::ConfigError;
use crate::producer::ProducerError;
use crate::sender::{ConsumerError, EncodingError};

/// Top-level error type for the event client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Consumer error: {0}")]
    Consumer(#[from] ConsumerError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Producer error: {0}")]
    Producer(#[from] ProducerError),

    #[error("Input error: {0}")]
    Input(String),
}
