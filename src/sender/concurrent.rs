use super::consumer::{Consumer, ConsumerConfig, ConsumerError, DeliveryMode};
use super::encoding;
use super::error_reporter::{CODE_UNSPECIFIED, ErrorReporter};
use super::http::{build_http_client, post_form};
use crate::buffer::Batch;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, warn};

/// Splits each batch across `num_threads` simultaneous requests.
///
/// In import mode the batch goes to the bulk import endpoint as one raw JSON
/// body authorized with a Basic token, unless the consumer targets the people
/// endpoint, which has no import counterpart.
pub struct ConcurrentHttpConsumer {
    client: Client,
    config: ConsumerConfig,
    url: String,
    import_url: String,
    reporter: ErrorReporter,
}

impl ConcurrentHttpConsumer {
    pub fn new(mut config: ConsumerConfig) -> Result<Self, ConsumerError> {
        config.num_threads = config.num_threads.max(1);
        config.validate()?;
        if config.mode != DeliveryMode::Sync {
            return Err(ConsumerError::InvalidConfiguration(
                "the concurrent consumer supports sync mode only".to_string(),
            ));
        }
        if config.import && config.authorization_token.is_empty() {
            return Err(ConsumerError::InvalidConfiguration(
                "import mode requires an authorization token".to_string(),
            ));
        }

        let client = build_http_client(&config)?;
        let url = config.url();
        let import_url = format!(
            "{}://{}/import?project_id={}",
            config.http_scheme(),
            config.authority(),
            config.project_id
        );

        Ok(Self {
            client,
            reporter: config.reporter("concurrent"),
            config,
            url,
            import_url,
        })
    }

    pub fn uses_import(&self) -> bool {
        self.config.import && self.config.endpoint != self.config.people_endpoint
    }

    pub fn url(&self) -> &str {
        if self.uses_import() {
            &self.import_url
        } else {
            &self.url
        }
    }

    async fn execute(&self, batch: &Batch) -> bool {
        let parts = batch.split(self.config.num_threads);
        debug!(
            url = %self.url,
            batch_id = batch.id(),
            records = batch.size(),
            requests = parts.len(),
            "Dispatching concurrent HTTP requests"
        );

        let results = join_all(
            parts
                .into_iter()
                .map(|part| post_form(&self.client, &self.url, part, &self.reporter)),
        )
        .await;

        let failed = results.iter().filter(|ok| !**ok).count();
        if failed > 0 {
            warn!(batch_id = batch.id(), failed, total = results.len(), "Sub-requests failed");
        }
        failed == 0
    }

    async fn execute_import(&self, batch: &Batch) -> bool {
        let body = match encoding::encode_json(batch.records()) {
            Ok(body) => body,
            Err(e) => {
                self.reporter
                    .report(CODE_UNSPECIFIED, &format!("Failed to encode batch: {e}"));
                return false;
            }
        };

        debug!(url = %self.import_url, batch_id = batch.id(), bytes = body.len(), "POST import batch");

        let response = self
            .client
            .post(&self.import_url)
            .header(CONTENT_TYPE, "application/json")
            .header(
                AUTHORIZATION,
                format!("Basic {}", self.config.authorization_token),
            )
            .body(body)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.reporter
                    .report(CODE_UNSPECIFIED, &format!("Import request failed: {e}"));
                return false;
            }
        };

        let status = response.status();
        if status.is_success() {
            return true;
        }

        let body = response.text().await.unwrap_or_default();
        self.reporter.report(status.as_u16() as i64, &body);
        if self.config.ignore_http_errors {
            debug!(status = status.as_u16(), "Ignoring HTTP error status for import");
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl Consumer for ConcurrentHttpConsumer {
    async fn persist(&mut self, batch: &Batch) -> bool {
        if batch.is_empty() {
            return true;
        }
        if self.uses_import() {
            self.execute_import(batch).await
        } else {
            self.execute(batch).await
        }
    }

    fn num_threads(&self) -> usize {
        self.config.num_threads
    }

    fn name(&self) -> &'static str {
        "concurrent"
    }
}
