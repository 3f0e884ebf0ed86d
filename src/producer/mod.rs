pub mod client;
pub mod events;
pub mod people;

pub use client::Client;
pub use events::Events;
pub use people::{People, PeopleOptions};

use crate::app::Config;
use crate::buffer::QueueConfig;
use crate::sender::{ConsumerConfig, ConsumerError, ConsumerKind, ConsumerRegistry, ErrorCallback};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Alias creation failed (distinct id: {distinct_id}, alias: {alias})")]
    AliasFailed { distinct_id: String, alias: String },
    #[error("Consumer error: {0}")]
    Consumer(#[from] ConsumerError),
}

/// Everything a producer needs to build its queue and consumer.
///
/// `consumer.endpoint` is the events endpoint; the people producer switches
/// to `consumer.people_endpoint`.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub queue: QueueConfig,
    pub consumer: ConsumerConfig,
    pub kind: ConsumerKind,
    pub registry: ConsumerRegistry,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            consumer: ConsumerConfig::default(),
            kind: ConsumerKind::Http,
            registry: ConsumerRegistry::new(),
        }
    }
}

impl ClientOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue: config.to_queue_config(),
            consumer: config.to_consumer_config(),
            kind: config.consumer_kind(),
            registry: ConsumerRegistry::new(),
        }
    }

    pub fn with_error_callback(mut self, callback: ErrorCallback) -> Self {
        self.consumer.error_callback = Some(callback);
        self
    }

    pub fn with_registry(mut self, registry: ConsumerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub(crate) fn for_people(&self) -> Self {
        let mut options = self.clone();
        options.consumer.endpoint = self.consumer.people_endpoint.clone();
        options
    }
}
