use super::{ClientOptions, ProducerError};
use crate::buffer::{Batch, EventQueue};
use crate::domain::Record;
use crate::sender::build_consumer;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Five dash-separated alphanumeric groups, the shape of a generated anonymous id.
const ANON_ID_PATTERN: &str = r"(?i)^[a-z0-9]*-[a-z0-9]*-[a-z0-9]*-[a-z0-9]*-[a-z0-9]*$";

fn anon_id_pattern() -> Option<&'static Regex> {
    static COMPILED: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    COMPILED
        .get_or_init(|| Regex::new(ANON_ID_PATTERN))
        .as_ref()
        .ok()
}

pub fn is_valid_anon_id(anon_id: &str) -> bool {
    anon_id_pattern().is_some_and(|pattern| pattern.is_match(anon_id))
}

/// Strings without their JSON quotes, anything else as JSON.
fn plain(value: &Value) -> String {
    value
        .as_str()
        .map_or_else(|| value.to_string(), str::to_string)
}

/// Tracks events, merging registered super properties into each one.
pub struct Events {
    token: String,
    queue: EventQueue,
    super_properties: Map<String, Value>,
    options: ClientOptions,
}

impl Events {
    pub fn new(token: impl Into<String>, options: ClientOptions) -> Result<Self, ProducerError> {
        let consumer = build_consumer(&options.consumer, &options.kind, &options.registry)?;
        let mut super_properties = Map::new();
        super_properties.insert("mp_lib".to_string(), Value::from("rust"));

        Ok(Self {
            token: token.into(),
            queue: EventQueue::new(options.queue, consumer),
            super_properties,
            options,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn endpoint(&self) -> &str {
        &self.options.consumer.endpoint
    }

    /// Queues `{"event": event, "properties": ...}`.
    ///
    /// `token` and `time` are filled in when the caller did not set them;
    /// caller properties win over super properties.
    pub async fn track(&mut self, event: &str, properties: Record) {
        let mut properties = properties.into_inner();
        properties
            .entry("token")
            .or_insert_with(|| Value::from(self.token.clone()));
        properties
            .entry("time")
            .or_insert_with(|| Value::from(chrono::Utc::now().timestamp()));

        let mut merged = self.super_properties.clone();
        merged.extend(properties);

        let record = Record::new()
            .with("event", event)
            .with("properties", Value::Object(merged));
        self.queue.enqueue(record).await;
    }

    pub fn register(&mut self, property: impl Into<String>, value: impl Into<Value>) {
        self.super_properties.insert(property.into(), value.into());
    }

    pub fn register_all<I, K, V>(&mut self, properties: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (property, value) in properties {
            self.register(property, value);
        }
    }

    /// Registers `property` unless it already holds a value.
    pub fn register_once(&mut self, property: impl Into<String>, value: impl Into<Value>) {
        let property = property.into();
        if self.super_properties.get(&property).is_none_or(Value::is_null) {
            self.register(property, value);
        }
    }

    pub fn register_all_once<I, K, V>(&mut self, properties: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (property, value) in properties {
            self.register_once(property, value);
        }
    }

    pub fn unregister(&mut self, property: &str) {
        self.super_properties.remove(property);
    }

    pub fn unregister_all<'a>(&mut self, properties: impl IntoIterator<Item = &'a str>) {
        for property in properties {
            self.unregister(property);
        }
    }

    pub fn property(&self, property: &str) -> Option<&Value> {
        self.super_properties.get(property)
    }

    pub fn super_properties(&self) -> &Map<String, Value> {
        &self.super_properties
    }

    /// Associates later events with `user_id`. A well-formed `anon_id` is
    /// merged into it through an `$identify` event.
    pub async fn identify(&mut self, user_id: impl Into<Value>, anon_id: Option<&str>) {
        let user_id = user_id.into();
        self.register("distinct_id", user_id.clone());

        let Some(anon_id) = anon_id.filter(|id| !id.is_empty()) else {
            return;
        };
        if !is_valid_anon_id(anon_id) {
            warn!(
                identified_id = %user_id,
                anon_id,
                "Identify failed, anon_id is not a valid anonymous id"
            );
            return;
        }

        let properties = Record::new()
            .with("$identified_id", user_id)
            .with("$anon_id", anon_id);
        self.track("$identify", properties).await;
    }

    /// Sends `$create_alias` right away through a fresh synchronous consumer,
    /// bypassing the queue.
    pub async fn create_alias(
        &mut self,
        distinct_id: impl Into<Value>,
        alias: impl Into<Value>,
    ) -> Result<Record, ProducerError> {
        let distinct_id = distinct_id.into();
        let alias = alias.into();
        let properties = Record::new()
            .with("distinct_id", distinct_id.clone())
            .with("alias", alias.clone())
            .with("token", self.token.clone());
        let record = Record::new()
            .with("event", "$create_alias")
            .with("properties", Value::from(properties));

        let mut consumer = build_consumer(
            &self.options.consumer.synchronous(),
            &self.options.kind,
            &self.options.registry,
        )?;
        debug!(consumer = consumer.name(), %distinct_id, %alias, "Creating alias");

        if consumer.persist(&Batch::new(vec![record.clone()])).await {
            Ok(record)
        } else {
            warn!(%distinct_id, %alias, "Creating alias failed");
            Err(ProducerError::AliasFailed {
                distinct_id: plain(&distinct_id),
                alias: plain(&alias),
            })
        }
    }

    pub async fn enqueue(&mut self, record: Record) {
        self.queue.enqueue(record).await;
    }

    pub async fn enqueue_all(&mut self, records: impl IntoIterator<Item = Record>) {
        self.queue.enqueue_all(records).await;
    }

    pub async fn flush(&mut self) -> bool {
        self.queue.flush().await
    }

    pub async fn flush_with(&mut self, desired_batch_size: usize) -> bool {
        self.queue.flush_with(desired_batch_size).await
    }

    pub fn reset(&mut self) {
        self.queue.reset();
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub async fn close(self) -> bool {
        self.queue.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anon_id_pattern() {
        assert!(is_valid_anon_id("0a1b2c3d-0000-4000-8000-abcdefabcdef"));
        assert!(is_valid_anon_id("ABC-def-1-2-3"));
        assert!(!is_valid_anon_id("not-a-uuid"));
        assert!(!is_valid_anon_id("a-b-c-d-e-f"));
        assert!(!is_valid_anon_id("a_b-c-d-e"));
    }
}
