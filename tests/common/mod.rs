#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rask_event_client::sender::{Consumer, ConsumerConfig, ConsumerRegistry, DeliveryMode};
use rask_event_client::{Batch, Record};
use std::collections::VecDeque;
use std::sync::Arc;

/// Everything a `RecordingConsumer` saw, shared with the test.
#[derive(Default)]
pub struct Recorded {
    pub batches: Mutex<Vec<Vec<Record>>>,
    /// Outcomes to return, front first; `true` once exhausted.
    pub outcomes: Mutex<VecDeque<bool>>,
    pub endpoints: Mutex<Vec<String>>,
    pub modes: Mutex<Vec<DeliveryMode>>,
}

impl Recorded {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, times: usize) {
        self.outcomes.lock().extend(std::iter::repeat_n(false, times));
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(Vec::len).collect()
    }

    pub fn delivered(&self) -> Vec<Record> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

pub struct RecordingConsumer {
    recorded: Arc<Recorded>,
    threads: usize,
}

impl RecordingConsumer {
    pub fn new(recorded: Arc<Recorded>, threads: usize) -> Self {
        Self { recorded, threads }
    }
}

#[async_trait]
impl Consumer for RecordingConsumer {
    async fn persist(&mut self, batch: &Batch) -> bool {
        let outcome = self.recorded.outcomes.lock().pop_front().unwrap_or(true);
        if outcome {
            self.recorded.batches.lock().push(batch.records().to_vec());
        }
        outcome
    }

    fn num_threads(&self) -> usize {
        self.threads
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// A registry with a `recording` consumer that logs each configuration it is built from.
pub fn recording_registry(recorded: Arc<Recorded>) -> ConsumerRegistry {
    let mut registry = ConsumerRegistry::new();
    registry.register("recording", move |config: &ConsumerConfig| {
        recorded.endpoints.lock().push(config.endpoint.clone());
        recorded.modes.lock().push(config.mode);
        Ok(Box::new(RecordingConsumer::new(recorded.clone(), config.num_threads)) as Box<dyn Consumer>)
    });
    registry
}

pub fn records(n: usize) -> Vec<Record> {
    (0..n).map(|i| Record::new().with("i", i)).collect()
}
