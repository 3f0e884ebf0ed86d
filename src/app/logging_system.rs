use super::config::{ConfigError, LogFormat, LogLevel};
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid directive '{input}': expected target=level")]
    InvalidDirective { input: String },
    #[error("Invalid log level in '{input}': {source}")]
    InvalidLevel {
        input: String,
        #[source]
        source: ConfigError,
    },
    #[error("Logging initialization failed: {0}")]
    InitFailed(String),
}

/// One `target=level` pair of an `EnvFilter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDirective {
    pub target: String,
    pub level: LogLevel,
}

impl LogDirective {
    pub fn new(target: impl Into<String>, level: LogLevel) -> Self {
        Self {
            target: target.into(),
            level,
        }
    }

    pub fn parse(directive: &str) -> Result<Self, LoggingError> {
        let Some((target, level)) = directive.split_once('=') else {
            return Err(LoggingError::InvalidDirective {
                input: directive.to_string(),
            });
        };
        let target = target.trim();
        if target.is_empty() || level.contains('=') {
            return Err(LoggingError::InvalidDirective {
                input: directive.to_string(),
            });
        }
        let level = level
            .trim()
            .parse()
            .map_err(|source| LoggingError::InvalidLevel {
                input: directive.to_string(),
                source,
            })?;
        Ok(Self::new(target, level))
    }

    pub fn to_filter_string(&self) -> String {
        format!("{}={}", self.target, self.level.as_str())
    }
}

/// Collects per-target directives and installs the global subscriber.
pub struct LoggingSystem {
    directives: Arc<RwLock<Vec<LogDirective>>>,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Adds a directive. Malformed input is skipped with a warning on stderr
    /// since the subscriber is not installed yet.
    pub fn add_directive(&self, directive_str: &str) {
        match LogDirective::parse(directive_str) {
            Ok(directive) => self.directives.write().push(directive),
            Err(e) => eprintln!("Warning: {e}, skipping directive"),
        }
    }

    /// Quiets the HTTP and TLS stacks.
    pub fn add_default_directives(&self) {
        let mut directives = self.directives.write();
        for target in ["hyper", "hyper_util", "reqwest", "rustls", "h2"] {
            directives.push(LogDirective::new(target, LogLevel::Warn));
        }
    }

    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let directives = self.directives.read();
        std::iter::once(default_level.as_str().to_string())
            .chain(directives.iter().map(LogDirective::to_filter_string))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn initialize_tracing(
        &self,
        default_level: LogLevel,
        format: LogFormat,
    ) -> Result<(), LoggingError> {
        let filter_string = self.build_filter_string(default_level);
        let env_filter = EnvFilter::try_new(&filter_string).map_err(|e| {
            LoggingError::InitFailed(format!("Failed to create EnvFilter with '{filter_string}': {e}"))
        })?;

        let registry = tracing_subscriber::registry().with(env_filter);
        let result = match format {
            LogFormat::Compact => registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .with_writer(std::io::stderr)
                        .compact(),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_writer(std::io::stderr),
                )
                .try_init(),
        };
        result.map_err(|e| LoggingError::InitFailed(e.to_string()))
    }

    pub fn directive_count(&self) -> usize {
        self.directives.read().len()
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the global subscriber once per process; later calls return the
/// outcome of the first.
pub fn setup_logging_safe(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();

    INIT.get_or_init(|| {
        let logging_system = LoggingSystem::new();
        logging_system.add_default_directives();
        logging_system
            .initialize_tracing(level, format)
            .map_err(|e| e.to_string())
    })
    .clone()
    .map_err(LoggingError::InitFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_directive_parsing() {
        let directive = LogDirective::parse("reqwest=error").unwrap();
        assert_eq!(directive, LogDirective::new("reqwest", LogLevel::Error));
        assert_eq!(directive.to_filter_string(), "reqwest=error");

        for input in ["", "hyper", "=warn", "hyper=", "hyper=loud", "a=warn=b"] {
            assert!(LogDirective::parse(input).is_err(), "should reject {input:?}");
        }
    }

    #[test]
    fn test_invalid_directive_is_skipped() {
        let logging_system = LoggingSystem::new();
        logging_system.add_directive("invalid");
        logging_system.add_directive("rask_event_client=trace");
        assert_eq!(logging_system.directive_count(), 1);
    }

    #[test]
    fn test_build_filter_string() {
        let logging_system = LoggingSystem::new();
        assert_eq!(logging_system.build_filter_string(LogLevel::Info), "info");

        logging_system.add_default_directives();
        let filter = logging_system.build_filter_string(LogLevel::Debug);
        assert!(filter.starts_with("debug,"));
        assert!(filter.contains("reqwest=warn"));
        assert!(filter.contains("rustls=warn"));
    }

    #[test]
    fn test_concurrent_directive_modification() {
        let logging_system = Arc::new(LoggingSystem::new());
        let handles: Vec<_> = (0..50)
            .map(|i| {
                let logging_system = logging_system.clone();
                thread::spawn(move || {
                    logging_system.add_directive(&format!("target{i}=info"));
                    logging_system.build_filter_string(LogLevel::Info)
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().is_ok());
        }
        assert_eq!(logging_system.directive_count(), 50);
    }

    #[test]
    fn test_setup_logging_is_idempotent() {
        let first = setup_logging_safe(LogLevel::Info, LogFormat::Compact);
        let second = setup_logging_safe(LogLevel::Debug, LogFormat::Json);
        assert_eq!(first.is_ok(), second.is_ok());
    }
}
