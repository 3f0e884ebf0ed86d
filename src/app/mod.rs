pub mod config;
pub mod logging_system;
pub mod shutdown;

pub use config::{Config, ConfigError, LogFormat, LogLevel};
pub use logging_system::{LoggingError, LoggingSystem, setup_logging_safe};
pub use shutdown::spawn_signal_handler;

use crate::buffer::EventQueue;
use crate::domain::{ClientError, Record};
use crate::sender::{ConsumerRegistry, build_consumer};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of one [`App::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Records read and queued.
    pub queued: usize,
    /// Lines that were not JSON objects.
    pub skipped: usize,
    /// Whether every queued record was accepted by the consumer.
    pub delivered: bool,
    /// Whether input was cut short by a shutdown signal.
    pub interrupted: bool,
}

/// Feeds NDJSON records from a reader into the configured consumer.
pub struct App {
    config: Config,
    registry: ConsumerRegistry,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Ok(Self::new(Config::from_args(args)?))
    }

    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: ConsumerRegistry::new(),
        }
    }

    pub fn with_registry(mut self, registry: ConsumerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reads until EOF or until `shutdown` fires, then closes the queue.
    pub async fn run<R>(self, input: R, shutdown: CancellationToken) -> Result<RunSummary, ClientError>
    where
        R: AsyncBufRead + Unpin,
    {
        let kind = self.config.consumer_kind();
        let consumer = build_consumer(&self.config.to_consumer_config(), &kind, &self.registry)?;
        info!(
            consumer = %kind,
            host = %self.config.host,
            mode = ?self.config.mode,
            "Starting rask-event-client v{}",
            env!("CARGO_PKG_VERSION")
        );

        let mut queue = EventQueue::new(self.config.to_queue_config(), consumer);
        let mut summary = RunSummary::default();
        let mut lines = input.lines();
        let mut line_number = 0usize;

        loop {
            let line = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    summary.interrupted = true;
                    break;
                }
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    queue.close().await;
                    return Err(ClientError::Input(format!(
                        "Failed to read line {}: {e}",
                        line_number + 1
                    )));
                }
            };
            line_number += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed).map(Record::try_from) {
                Ok(Ok(record)) => {
                    queue.enqueue(record).await;
                    summary.queued += 1;
                }
                Ok(Err(_)) => {
                    warn!(line = line_number, "Skipping line: not a JSON object");
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!(line = line_number, error = %e, "Skipping line: invalid JSON");
                    summary.skipped += 1;
                }
            }
        }

        summary.delivered = queue.close().await;
        info!(
            queued = summary.queued,
            skipped = summary.skipped,
            delivered = summary.delivered,
            interrupted = summary.interrupted,
            "Input processed"
        );
        Ok(summary)
    }
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
