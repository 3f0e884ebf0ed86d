use super::concurrent::ConcurrentHttpConsumer;
use super::error_reporter::{ErrorCallback, ErrorReporter};
use super::file::FileConsumer;
use super::http::HttpConsumer;
use super::socket::SocketConsumer;
use crate::buffer::Batch;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Missing capability: {0}")]
    MissingCapability(String),
    #[error("Unknown consumer: {0}")]
    UnknownConsumer(String),
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("HTTP client setup failed: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// A delivery strategy for batches.
///
/// `persist` never returns an error for ordinary delivery failure: it reports
/// through its `ErrorReporter` and returns `false`, and the whole batch is
/// treated as failed.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Consumer: Send {
    async fn persist(&mut self, batch: &Batch) -> bool;

    /// Parallel delivery units; the queue sizes batches by this.
    fn num_threads(&self) -> usize {
        1
    }

    fn name(&self) -> &'static str;
}

#[async_trait]
impl<C: Consumer + ?Sized> Consumer for Box<C> {
    async fn persist(&mut self, batch: &Batch) -> bool {
        (**self).persist(batch).await
    }

    fn num_threads(&self) -> usize {
        (**self).num_threads()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// How a consumer waits for the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Wait for and check the collector's response.
    #[default]
    Sync,
    /// Socket only: a completed write counts as delivered.
    Async,
    /// HTTP only: hand the request to a detached `curl` process.
    Fork,
}

/// Built-in consumers plus caller-registered ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerKind {
    Http,
    ConcurrentHttp,
    Socket,
    File,
    Custom(String),
}

impl FromStr for ConsumerKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "http" | "curl" => ConsumerKind::Http,
            "concurrent" | "concurrent_http" | "guzzle" => ConsumerKind::ConcurrentHttp,
            "socket" => ConsumerKind::Socket,
            "file" => ConsumerKind::File,
            _ => ConsumerKind::Custom(s.to_string()),
        })
    }
}

impl fmt::Display for ConsumerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumerKind::Http => f.write_str("http"),
            ConsumerKind::ConcurrentHttp => f.write_str("concurrent"),
            ConsumerKind::Socket => f.write_str("socket"),
            ConsumerKind::File => f.write_str("file"),
            ConsumerKind::Custom(name) => f.write_str(name),
        }
    }
}

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SINK_FILE: &str = "messages.txt";

#[derive(Clone)]
pub struct ConsumerConfig {
    pub host: String,
    /// Overrides the scheme's default port (80 / 443).
    pub port: Option<u16>,
    pub endpoint: String,
    pub people_endpoint: String,
    pub use_ssl: bool,
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub num_threads: usize,
    pub mode: DeliveryMode,
    pub import: bool,
    pub ignore_http_errors: bool,
    pub authorization_token: String,
    pub project_id: String,
    pub file: PathBuf,
    pub error_callback: Option<ErrorCallback>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            host: "api.mixpanel.com".to_string(),
            port: None,
            endpoint: "/track".to_string(),
            people_endpoint: "/engage".to_string(),
            use_ssl: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            timeout: DEFAULT_TIMEOUT,
            num_threads: 1,
            mode: DeliveryMode::Sync,
            import: false,
            ignore_http_errors: false,
            authorization_token: String::new(),
            project_id: String::new(),
            file: PathBuf::from(DEFAULT_SINK_FILE),
            error_callback: None,
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<(), ConsumerError> {
        if self.host.is_empty() {
            return Err(ConsumerError::InvalidConfiguration(
                "Host must not be empty".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() || self.timeout.is_zero() {
            return Err(ConsumerError::InvalidConfiguration(
                "Timeouts must be greater than 0".to_string(),
            ));
        }
        if self.num_threads == 0 {
            return Err(ConsumerError::InvalidConfiguration(
                "num_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn http_scheme(&self) -> &'static str {
        if self.use_ssl { "https" } else { "http" }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.use_ssl { 443 } else { 80 })
    }

    /// Authority for URLs: the host, plus the port when overridden.
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    pub fn url(&self) -> String {
        format!("{}://{}{}", self.http_scheme(), self.authority(), self.endpoint)
    }

    pub fn reporter(&self, consumer: &'static str) -> ErrorReporter {
        ErrorReporter::new(consumer, self.error_callback.clone())
    }

    /// Same settings, forced to wait for the collector's answer.
    pub fn synchronous(&self) -> Self {
        Self {
            mode: DeliveryMode::Sync,
            ..self.clone()
        }
    }
}

impl fmt::Debug for ConsumerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("endpoint", &self.endpoint)
            .field("use_ssl", &self.use_ssl)
            .field("connect_timeout", &self.connect_timeout)
            .field("timeout", &self.timeout)
            .field("num_threads", &self.num_threads)
            .field("mode", &self.mode)
            .field("import", &self.import)
            .field("file", &self.file)
            .field("error_callback", &self.error_callback.is_some())
            .finish_non_exhaustive()
    }
}

pub type ConsumerFactory =
    Arc<dyn Fn(&ConsumerConfig) -> Result<Box<dyn Consumer>, ConsumerError> + Send + Sync>;

/// Caller-registered consumers, looked up by `ConsumerKind::Custom` name.
#[derive(Clone, Default)]
pub struct ConsumerRegistry {
    factories: HashMap<String, ConsumerFactory>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ConsumerConfig) -> Result<Box<dyn Consumer>, ConsumerError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ConsumerFactory> {
        self.factories.get(name)
    }
}

impl fmt::Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerRegistry")
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Constructs the selected consumer, failing fast on configuration problems.
pub fn build_consumer(
    config: &ConsumerConfig,
    kind: &ConsumerKind,
    registry: &ConsumerRegistry,
) -> Result<Box<dyn Consumer>, ConsumerError> {
    let consumer: Box<dyn Consumer> = match kind {
        ConsumerKind::Http => Box::new(HttpConsumer::new(config.clone())?),
        ConsumerKind::ConcurrentHttp => Box::new(ConcurrentHttpConsumer::new(config.clone())?),
        ConsumerKind::Socket => Box::new(SocketConsumer::new(config.clone())?),
        ConsumerKind::File => Box::new(FileConsumer::new(config.clone())?),
        ConsumerKind::Custom(name) => {
            let factory = registry
                .get(name)
                .ok_or_else(|| ConsumerError::UnknownConsumer(name.clone()))?;
            factory(config)?
        }
    };
    tracing::debug!(consumer = consumer.name(), "Instantiated new consumer");
    Ok(consumer)
}
