use super::serde_helpers::{
    load_env_bool, load_env_path, load_env_path_opt, load_env_string, load_env_string_opt,
    load_env_var, load_env_var_opt,
};
use super::{ConfigError, LogFormat, LogLevel};
use crate::buffer::{DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_QUEUE_SIZE, QueueConfig};
use crate::sender::consumer::DEFAULT_SINK_FILE;
use crate::sender::{ConsumerConfig, ConsumerKind, DeliveryMode};
use clap::parser::ValueSource;
use clap::{ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding a complete TOML configuration.
pub const CONFIG_ENV: &str = "EVENT_CLIENT_CONFIG";

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Largest number of records per request
    #[arg(long, env = "EVENT_MAX_BATCH_SIZE", default_value_t = DEFAULT_MAX_BATCH_SIZE)]
    pub max_batch_size: usize,

    /// Queue length that triggers an automatic flush
    #[arg(long, env = "EVENT_MAX_QUEUE_SIZE", default_value_t = DEFAULT_MAX_QUEUE_SIZE)]
    pub max_queue_size: usize,

    /// Consumer: http, concurrent, socket, file or a registered name
    #[arg(long, env = "EVENT_CONSUMER", default_value = "http")]
    pub consumer: String,

    /// Collector host name
    #[arg(long, env = "EVENT_HOST", default_value = "api.mixpanel.com")]
    pub host: String,

    /// Collector port (defaults to 443 with TLS, 80 without)
    #[arg(long, env = "EVENT_PORT")]
    pub port: Option<u16>,

    /// Path for event batches
    #[arg(long, env = "EVENT_EVENTS_ENDPOINT", default_value = "/track")]
    pub events_endpoint: String,

    /// Path for profile update batches
    #[arg(long, env = "EVENT_PEOPLE_ENDPOINT", default_value = "/engage")]
    pub people_endpoint: String,

    /// Use TLS
    #[arg(long, env = "EVENT_USE_SSL", default_value_t = true, action = ArgAction::Set)]
    pub use_ssl: bool,

    /// Connection timeout in seconds
    #[arg(long, env = "EVENT_CONNECT_TIMEOUT_SECS", default_value = "5")]
    pub connect_timeout_secs: u64,

    /// Overall request timeout in seconds
    #[arg(long, env = "EVENT_TIMEOUT_SECS", default_value = "30")]
    pub timeout_secs: u64,

    /// Delivery mode (sync, async, fork)
    #[arg(long, env = "EVENT_MODE", value_enum, default_value = "sync")]
    pub mode: DeliveryMode,

    /// Parallel requests per flush (concurrent consumer)
    #[arg(long, env = "EVENT_NUM_THREADS", default_value = "1")]
    pub num_threads: usize,

    /// Send event batches to the bulk import endpoint
    #[arg(long, env = "EVENT_IMPORT")]
    pub import: bool,

    /// Treat non-2xx import responses as delivered
    #[arg(long, env = "EVENT_IGNORE_HTTP_ERRORS")]
    pub ignore_http_errors: bool,

    /// Basic authorization token for import mode
    #[arg(long, env = "EVENT_AUTHORIZATION_TOKEN", hide_env_values = true)]
    pub authorization_token: Option<String>,

    /// Project id for import mode
    #[arg(long, env = "EVENT_PROJECT_ID")]
    pub project_id: Option<String>,

    /// Sink path for the file consumer
    #[arg(long, env = "EVENT_FILE", default_value = DEFAULT_SINK_FILE)]
    pub file: PathBuf,

    /// Raise log verbosity to at least debug
    #[arg(long, env = "EVENT_DEBUG")]
    pub debug: bool,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "compact")]
    pub log_format: LogFormat,

    /// Configuration file path (optional)
    #[arg(long, env = "EVENT_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// NDJSON input file; stdin when absent
    #[serde(skip)]
    #[arg(long, short)]
    pub input: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub connect_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            consumer: "http".to_string(),
            host: "api.mixpanel.com".to_string(),
            port: None,
            events_endpoint: "/track".to_string(),
            people_endpoint: "/engage".to_string(),
            use_ssl: true,
            connect_timeout_secs: 5,
            timeout_secs: 30,
            mode: DeliveryMode::Sync,
            num_threads: 1,
            import: false,
            ignore_http_errors: false,
            authorization_token: None,
            project_id: None,
            file: PathBuf::from(DEFAULT_SINK_FILE),
            debug: false,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            config_file: None,
            input: None,
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Copies each listed field from `base` unless it was given on the command
/// line or through its environment variable.
macro_rules! merge_unset {
    ($config:expr, $base:expr, $matches:expr; $($field:ident),+ $(,)?) => {
        $(
            if !is_explicit($matches, stringify!($field)) {
                $config.$field = $base.$field.clone();
            }
        )+
    };
}

fn is_explicit(matches: &ArgMatches, id: &str) -> bool {
    matches!(
        matches.value_source(id),
        Some(ValueSource::CommandLine | ValueSource::EnvVariable)
    )
}

impl Config {
    /// Parses CLI arguments (with env fallbacks). Values not given there are
    /// taken from `--config-file` or `EVENT_CLIENT_CONFIG` when present.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = Config::command()
            .try_get_matches_from(args)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        let mut config = Config::from_arg_matches(&matches)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        let base = if let Some(path) = &config.config_file {
            Some(Self::read_file(path)?)
        } else if let Ok(raw) = std::env::var(CONFIG_ENV) {
            Some(toml::from_str::<Config>(&raw)?)
        } else {
            None
        };
        if let Some(base) = base {
            config.merge_unset_from(&base, &matches);
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(raw) = std::env::var(CONFIG_ENV) {
            return Self::from_toml_str(&raw);
        }

        let mut config = Config::default();

        load_env_var("EVENT_MAX_BATCH_SIZE", &mut config.max_batch_size)?;
        load_env_var("EVENT_MAX_QUEUE_SIZE", &mut config.max_queue_size)?;
        load_env_string("EVENT_CONSUMER", &mut config.consumer);
        load_env_string("EVENT_HOST", &mut config.host);
        load_env_var_opt("EVENT_PORT", &mut config.port)?;
        load_env_string("EVENT_EVENTS_ENDPOINT", &mut config.events_endpoint);
        load_env_string("EVENT_PEOPLE_ENDPOINT", &mut config.people_endpoint);
        load_env_bool("EVENT_USE_SSL", &mut config.use_ssl)?;
        load_env_var("EVENT_CONNECT_TIMEOUT_SECS", &mut config.connect_timeout_secs)?;
        load_env_var("EVENT_TIMEOUT_SECS", &mut config.timeout_secs)?;

        if let Ok(mode) = std::env::var("EVENT_MODE") {
            config.mode = DeliveryMode::from_str(&mode, true).map_err(|_| {
                ConfigError::EnvError(format!(
                    "Invalid EVENT_MODE: {mode}. Valid values: sync, async, fork"
                ))
            })?;
        }

        load_env_var("EVENT_NUM_THREADS", &mut config.num_threads)?;
        load_env_bool("EVENT_IMPORT", &mut config.import)?;
        load_env_bool("EVENT_IGNORE_HTTP_ERRORS", &mut config.ignore_http_errors)?;
        load_env_string_opt("EVENT_AUTHORIZATION_TOKEN", &mut config.authorization_token);
        load_env_string_opt("EVENT_PROJECT_ID", &mut config.project_id);
        load_env_path("EVENT_FILE", &mut config.file);
        load_env_bool("EVENT_DEBUG", &mut config.debug)?;
        load_env_var("LOG_LEVEL", &mut config.log_level)?;
        load_env_var("LOG_FORMAT", &mut config.log_format)?;
        load_env_path_opt("EVENT_CONFIG_FILE", &mut config.config_file);

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path.as_ref())?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(raw)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    fn merge_unset_from(&mut self, base: &Config, matches: &ArgMatches) {
        merge_unset!(self, base, matches;
            max_batch_size,
            max_queue_size,
            consumer,
            host,
            port,
            events_endpoint,
            people_endpoint,
            use_ssl,
            connect_timeout_secs,
            timeout_secs,
            mode,
            num_threads,
            import,
            ignore_http_errors,
            authorization_token,
            project_id,
            file,
            debug,
            log_level,
            log_format,
        );
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.connect_timeout = Duration::from_secs(self.connect_timeout_secs);
        self.timeout = Duration::from_secs(self.timeout_secs);
        self.num_threads = self.num_threads.max(1);

        if self.debug && self.log_level < LogLevel::Debug {
            self.log_level = LogLevel::Debug;
        }

        Ok(())
    }

    pub fn consumer_kind(&self) -> ConsumerKind {
        match self.consumer.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }

    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_batch_size: self.max_batch_size,
            max_queue_size: self.max_queue_size,
        }
    }

    /// Consumer settings for event batches.
    pub fn to_consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            host: self.host.clone(),
            port: self.port,
            endpoint: self.events_endpoint.clone(),
            people_endpoint: self.people_endpoint.clone(),
            use_ssl: self.use_ssl,
            connect_timeout: self.connect_timeout,
            timeout: self.timeout,
            num_threads: self.num_threads,
            mode: self.mode,
            import: self.import,
            ignore_http_errors: self.ignore_http_errors,
            authorization_token: self.authorization_token.clone().unwrap_or_default(),
            project_id: self.project_id.clone().unwrap_or_default(),
            file: self.file.clone(),
            error_callback: None,
        }
    }

    /// Same as [`Config::to_consumer_config`], aimed at the people endpoint.
    pub fn to_people_consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            endpoint: self.people_endpoint.clone(),
            ..self.to_consumer_config()
        }
    }
}
