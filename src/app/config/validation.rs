use super::{Config, ConfigError};
use crate::sender::ConsumerKind;
use url::Url;

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let collector = format!(
            "{}://{}",
            if self.use_ssl { "https" } else { "http" },
            self.host
        );
        let url = Url::parse(&collector).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid collector host '{}': {}", self.host, e))
        })?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ConfigError::InvalidUrl(format!(
                "Collector host must not be empty: '{}'",
                self.host
            )));
        }

        for (name, endpoint) in [
            ("events_endpoint", &self.events_endpoint),
            ("people_endpoint", &self.people_endpoint),
        ] {
            if !endpoint.starts_with('/') {
                return Err(ConfigError::InvalidConfig(format!(
                    "{name} must start with '/': '{endpoint}'"
                )));
            }
        }

        if self.max_batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_batch_size must be greater than 0".to_string(),
            ));
        }

        if self.max_queue_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_queue_size must be greater than 0".to_string(),
            ));
        }

        if self.connect_timeout_secs == 0 || self.timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Timeouts must be greater than 0".to_string(),
            ));
        }

        if self.import
            && self
                .authorization_token
                .as_deref()
                .is_none_or(str::is_empty)
        {
            return Err(ConfigError::InvalidConfig(
                "import mode requires authorization_token".to_string(),
            ));
        }

        if self.consumer_kind() == ConsumerKind::File && self.file.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "the file consumer requires a file path".to_string(),
            ));
        }

        Ok(())
    }
}
