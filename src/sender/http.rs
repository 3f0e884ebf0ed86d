use super::consumer::{Consumer, ConsumerConfig, ConsumerError, DeliveryMode};
use super::encoding;
use super::error_reporter::{CODE_UNSPECIFIED, ErrorReporter};
use crate::buffer::Batch;
use crate::domain::Record;
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

/// Literal body the collector answers with when it accepted a form batch.
pub const ACK_MARKER: &str = "1";

const USER_AGENT: &str = concat!("rask-event-client/", env!("CARGO_PKG_VERSION"));

pub(crate) fn build_http_client(config: &ConsumerConfig) -> Result<Client, ConsumerError> {
    Ok(ClientBuilder::new()
        .connect_timeout(config.connect_timeout)
        .timeout(config.timeout)
        .user_agent(USER_AGENT)
        .build()?)
}

/// POSTs `data=<base64>` and checks status and acknowledgement marker.
/// Shared by the blocking and the concurrent consumer.
pub(crate) async fn post_form(
    client: &Client,
    url: &str,
    records: &[Record],
    reporter: &ErrorReporter,
) -> bool {
    let data = match encoding::encode(records) {
        Ok(data) => data,
        Err(e) => {
            reporter.report(CODE_UNSPECIFIED, &format!("Failed to encode batch: {e}"));
            return false;
        }
    };

    let start = Instant::now();
    debug!(url, records = records.len(), bytes = data.len(), "POST form batch");

    let response = match client.post(url).form(&[("data", data)]).send().await {
        Ok(response) => response,
        Err(e) => {
            let code = e.status().map_or(CODE_UNSPECIFIED, |s| s.as_u16() as i64);
            reporter.report(code, &format!("Request to {url} failed: {e}"));
            return false;
        }
    };

    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            reporter.report(status.as_u16() as i64, &format!("Failed to read response body: {e}"));
            return false;
        }
    };

    debug!(url, status = status.as_u16(), latency = ?start.elapsed(), "Collector responded");

    if !status.is_success() {
        reporter.report(status.as_u16() as i64, &body);
        return false;
    }
    if body.trim() != ACK_MARKER {
        reporter.report(CODE_UNSPECIFIED, &body);
        return false;
    }
    true
}

/// Looks `program` up on `PATH`.
pub(crate) fn find_executable(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

enum Transport {
    Blocking(Client),
    Forked(PathBuf),
}

/// One request per batch, either awaited in-process or handed to `curl`.
pub struct HttpConsumer {
    config: ConsumerConfig,
    url: String,
    transport: Transport,
    reporter: ErrorReporter,
}

impl HttpConsumer {
    pub fn new(config: ConsumerConfig) -> Result<Self, ConsumerError> {
        config.validate()?;
        let transport = match config.mode {
            DeliveryMode::Sync => Transport::Blocking(build_http_client(&config)?),
            DeliveryMode::Fork => {
                let curl = find_executable("curl").ok_or_else(|| {
                    ConsumerError::MissingCapability(
                        "`curl` must be on PATH to use the http consumer in fork mode; \
                         use mode = sync or another consumer"
                            .to_string(),
                    )
                })?;
                Transport::Forked(curl)
            }
            DeliveryMode::Async => {
                return Err(ConsumerError::InvalidConfiguration(
                    "the http consumer supports sync and fork modes only".to_string(),
                ));
            }
        };

        Ok(Self {
            url: config.url(),
            reporter: config.reporter("http"),
            config,
            transport,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn mode(&self) -> DeliveryMode {
        self.config.mode
    }

    async fn execute_forked(&self, curl: &Path, batch: &Batch) -> bool {
        let body = match encoding::encode_form_body(batch.records()) {
            Ok(body) => body,
            Err(e) => {
                self.reporter
                    .report(CODE_UNSPECIFIED, &format!("Failed to encode batch: {e}"));
                return false;
            }
        };

        debug!(url = %self.url, bytes = body.len(), batch_id = batch.id(), "Making forked curl call");

        let spawned = Command::new(curl)
            .arg("-X")
            .arg("POST")
            .arg("-H")
            .arg("Content-Type: application/x-www-form-urlencoded")
            .arg("--connect-timeout")
            .arg(self.config.connect_timeout.as_secs().max(1).to_string())
            .arg("--max-time")
            .arg(self.config.timeout.as_secs().max(1).to_string())
            .arg("-d")
            .arg(body)
            .arg(&self.url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            // Detached: the child keeps running after the handle is dropped.
            Ok(_child) => true,
            Err(e) => {
                self.reporter.report_io("Failed to spawn curl", &e);
                false
            }
        }
    }
}

#[async_trait]
impl Consumer for HttpConsumer {
    async fn persist(&mut self, batch: &Batch) -> bool {
        if batch.is_empty() {
            return true;
        }
        match &self.transport {
            Transport::Blocking(client) => {
                debug!(url = %self.url, batch_id = batch.id(), "Making blocking HTTP call");
                post_form(client, &self.url, batch.records(), &self.reporter).await
            }
            Transport::Forked(curl) => self.execute_forked(curl, batch).await,
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_mode_is_rejected() {
        let config = ConsumerConfig {
            mode: DeliveryMode::Async,
            ..Default::default()
        };
        assert!(matches!(
            HttpConsumer::new(config),
            Err(ConsumerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_find_executable_misses_unknown_program() {
        assert!(find_executable("definitely-not-a-real-program-xyz").is_none());
    }

    #[tokio::test]
    async fn test_empty_batch_skips_network() {
        let config = ConsumerConfig {
            host: "127.0.0.1".to_string(),
            port: Some(9),
            use_ssl: false,
            ..Default::default()
        };
        let mut consumer = HttpConsumer::new(config).unwrap();
        assert_eq!(consumer.url(), "http://127.0.0.1:9/track");
        assert!(consumer.persist(&Batch::new(Vec::new())).await);
    }
}
