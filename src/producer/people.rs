use super::{ClientOptions, ProducerError};
use crate::buffer::EventQueue;
use crate::domain::Record;
use crate::sender::build_consumer;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

/// Per-call flags attached to a profile update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeopleOptions {
    /// Client IP, used by the collector for geolocation.
    pub ip: Option<String>,
    /// Leave the profile's "last seen" untouched.
    pub ignore_time: bool,
    /// Skip the alias lookup for the distinct id.
    pub ignore_alias: bool,
}

/// Creates and updates user profiles.
pub struct People {
    token: String,
    queue: EventQueue,
    endpoint: String,
}

impl People {
    pub fn new(token: impl Into<String>, options: ClientOptions) -> Result<Self, ProducerError> {
        let consumer = build_consumer(&options.consumer, &options.kind, &options.registry)?;
        Ok(Self {
            token: token.into(),
            queue: EventQueue::new(options.queue, consumer),
            endpoint: options.consumer.endpoint,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn payload(
        &self,
        distinct_id: Value,
        operation: &str,
        value: Value,
        options: &PeopleOptions,
    ) -> Record {
        let mut payload = Record::new()
            .with("$token", self.token.clone())
            .with("$distinct_id", distinct_id)
            .with(operation, value);
        if let Some(ip) = &options.ip {
            payload.insert("$ip", ip.clone());
        }
        if options.ignore_time {
            payload.insert("$ignore_time", true);
        }
        if options.ignore_alias {
            payload.insert("$ignore_alias", true);
        }
        payload
    }

    async fn update(
        &mut self,
        distinct_id: impl Into<Value>,
        operation: &str,
        value: Value,
        options: &PeopleOptions,
    ) {
        let payload = self.payload(distinct_id.into(), operation, value, options);
        self.queue.enqueue(payload).await;
    }

    /// Sets properties, overwriting existing values.
    pub async fn set(&mut self, distinct_id: impl Into<Value>, properties: Record, options: &PeopleOptions) {
        self.update(distinct_id, "$set", properties.into(), options).await;
    }

    /// Sets properties that do not have a value yet.
    pub async fn set_once(
        &mut self,
        distinct_id: impl Into<Value>,
        properties: Record,
        options: &PeopleOptions,
    ) {
        self.update(distinct_id, "$set_once", properties.into(), options).await;
    }

    pub async fn unset<I, S>(&mut self, distinct_id: impl Into<Value>, properties: I, options: &PeopleOptions)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<Value> = properties.into_iter().map(|p| Value::String(p.into())).collect();
        self.update(distinct_id, "$unset", Value::Array(names), options).await;
    }

    pub async fn increment(
        &mut self,
        distinct_id: impl Into<Value>,
        property: &str,
        amount: impl Into<Value>,
        options: &PeopleOptions,
    ) {
        let value = Record::new().with(property, amount);
        self.update(distinct_id, "$add", value.into(), options).await;
    }

    /// Appends to a list property; array values are unioned instead.
    pub async fn append(
        &mut self,
        distinct_id: impl Into<Value>,
        property: &str,
        value: impl Into<Value>,
        options: &PeopleOptions,
    ) {
        let value = value.into();
        let operation = if value.is_array() { "$union" } else { "$append" };
        let value = Record::new().with(property, value);
        self.update(distinct_id, operation, value.into(), options).await;
    }

    /// Records a transaction for revenue tracking, timestamped now unless given.
    pub async fn track_charge(
        &mut self,
        distinct_id: impl Into<Value>,
        amount: impl Into<Value>,
        timestamp: Option<DateTime<Utc>>,
        options: &PeopleOptions,
    ) {
        let time = timestamp.unwrap_or_else(Utc::now).to_rfc3339();
        let transaction = json!({ "$time": time, "$amount": amount.into() });
        let value = Record::new().with("$transactions", transaction);
        self.update(distinct_id, "$append", value.into(), options).await;
    }

    pub async fn clear_charges(&mut self, distinct_id: impl Into<Value>, options: &PeopleOptions) {
        let value = Record::new().with("$transactions", Value::Array(Vec::new()));
        self.update(distinct_id, "$set", value.into(), options).await;
    }

    pub async fn delete_user(&mut self, distinct_id: impl Into<Value>, options: &PeopleOptions) {
        self.update(distinct_id, "$delete", Value::from(""), options).await;
    }

    pub async fn enqueue(&mut self, record: Record) {
        self.queue.enqueue(record).await;
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
