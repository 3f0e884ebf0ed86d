use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Caller hook invoked inline on every delivery failure with `(code, message)`.
///
/// Runs on the delivery path, so it must return promptly.
pub type ErrorCallback = Arc<dyn Fn(i64, &str) + Send + Sync>;

/// Code used when a failure has no numeric origin (e.g. a bad acknowledgement body).
pub const CODE_UNSPECIFIED: i64 = 0;

#[derive(Clone, Default)]
pub struct ErrorReporter {
    consumer: &'static str,
    callback: Option<ErrorCallback>,
}

impl ErrorReporter {
    pub fn new(consumer: &'static str, callback: Option<ErrorCallback>) -> Self {
        Self { consumer, callback }
    }

    pub fn report(&self, code: i64, message: &str) {
        warn!(consumer = self.consumer, code, message, "Delivery failure");
        if let Some(callback) = &self.callback {
            callback(code, message);
        }
    }

    /// Reports an I/O failure, using the OS error number as code when there is one.
    pub fn report_io(&self, context: &str, error: &std::io::Error) {
        let code = error.raw_os_error().map_or(CODE_UNSPECIFIED, i64::from);
        self.report(code, &format!("{context}: {error}"));
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }
}

impl fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("consumer", &self.consumer)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_report_forwards_to_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = ErrorReporter::new(
            "test",
            Some(Arc::new(move |code, msg: &str| sink.lock().push((code, msg.to_string())))),
        );

        reporter.report(500, "server error");
        reporter.report_io(
            "connect",
            &std::io::Error::from_raw_os_error(111),
        );

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (500, "server error".to_string()));
        assert_eq!(seen[1].0, 111);
        assert!(seen[1].1.starts_with("connect: "));
    }

    #[test]
    fn test_report_without_callback_is_silent() {
        let reporter = ErrorReporter::new("test", None);
        assert!(!reporter.has_callback());
        reporter.report(1, "ignored");
    }
}
