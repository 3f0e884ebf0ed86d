use super::{ClientOptions, Events, People, ProducerError};
use crate::domain::Record;
use serde_json::Value;
use tracing::info;

/// An events producer and a people producer sharing one token and settings.
///
/// Each producer owns its own queue and consumer.
pub struct Client {
    pub events: Events,
    pub people: People,
}

impl Client {
    pub fn new(token: impl Into<String>, options: ClientOptions) -> Result<Self, ProducerError> {
        let token = token.into();
        let people = People::new(token.clone(), options.for_people())?;
        let events = Events::new(token, options)?;
        info!(
            events_endpoint = events.endpoint(),
            people_endpoint = people.endpoint(),
            "Client ready"
        );
        Ok(Self { events, people })
    }

    pub async fn track(&mut self, event: &str, properties: Record) {
        self.events.track(event, properties).await;
    }

    pub async fn identify(&mut self, user_id: impl Into<Value>, anon_id: Option<&str>) {
        self.events.identify(user_id, anon_id).await;
    }

    pub async fn create_alias(
        &mut self,
        distinct_id: impl Into<Value>,
        alias: impl Into<Value>,
    ) -> Result<Record, ProducerError> {
        self.events.create_alias(distinct_id, alias).await
    }

    pub fn register(&mut self, property: impl Into<String>, value: impl Into<Value>) {
        self.events.register(property, value);
    }

    /// Flushes both queues. True only if neither left records behind.
    pub async fn flush(&mut self) -> bool {
        let events = self.events.flush().await;
        let people = self.people.flush().await;
        events && people
    }

    pub fn reset(&mut self) {
        self.events.reset();
        self.people.reset();
    }

    pub async fn close(self) -> bool {
        let events = self.events.close().await;
        let people = self.people.close().await;
        events && people
    }
}
