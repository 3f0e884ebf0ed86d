use super::consumer::{Consumer, ConsumerConfig, ConsumerError};
use super::encoding;
use super::error_reporter::{CODE_UNSPECIFIED, ErrorReporter};
use crate::buffer::Batch;
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Appends each batch to a local file as one JSON array per line.
///
/// The write holds an exclusive advisory lock so several processes can share
/// one sink file without interleaving lines.
pub struct FileConsumer {
    path: PathBuf,
    reporter: ErrorReporter,
}

impl FileConsumer {
    pub fn new(config: ConsumerConfig) -> Result<Self, ConsumerError> {
        if config.file.as_os_str().is_empty() {
            return Err(ConsumerError::InvalidConfiguration(
                "the file consumer requires a file path".to_string(),
            ));
        }
        Ok(Self {
            reporter: config.reporter("file"),
            path: config.file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn append_locked(path: &Path, line: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock()?;
    let written = file.write_all(line).and_then(|()| file.flush());
    file.unlock()?;
    written
}

#[async_trait]
impl Consumer for FileConsumer {
    async fn persist(&mut self, batch: &Batch) -> bool {
        if batch.is_empty() {
            return true;
        }

        let mut line = match encoding::encode_json(batch.records()) {
            Ok(json) => json.into_bytes(),
            Err(e) => {
                self.reporter
                    .report(CODE_UNSPECIFIED, &format!("Failed to encode batch: {e}"));
                return false;
            }
        };
        line.push(b'\n');

        let path = self.path.clone();
        let bytes = line.len();
        match tokio::task::spawn_blocking(move || append_locked(&path, &line)).await {
            Ok(Ok(())) => {
                debug!(path = %self.path.display(), batch_id = batch.id(), bytes, "Appended batch");
                true
            }
            Ok(Err(e)) => {
                self.reporter
                    .report_io(&format!("Failed to write {}", self.path.display()), &e);
                false
            }
            Err(e) => {
                self.reporter
                    .report(CODE_UNSPECIFIED, &format!("File writer task failed: {e}"));
                false
            }
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Record;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_appends_one_line_per_batch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.txt");
        let mut consumer = FileConsumer::new(ConsumerConfig {
            file: path.clone(),
            ..Default::default()
        })
        .unwrap();

        let first = Batch::new(vec![Record::new().with("event", "a")]);
        let second = Batch::new(vec![
            Record::new().with("event", "b"),
            Record::new().with("event", "c"),
        ]);
        assert!(consumer.persist(&first).await);
        assert!(consumer.persist(&second).await);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(encoding::decode_json(lines[1]).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unwritable_path_fails() {
        let dir = TempDir::new().unwrap();
        let mut consumer = FileConsumer::new(ConsumerConfig {
            file: dir.path().join("missing").join("events.txt"),
            ..Default::default()
        })
        .unwrap();

        let batch = Batch::new(vec![Record::new().with("event", "a")]);
        assert!(!consumer.persist(&batch).await);
    }

    #[test]
    fn test_empty_path_rejected() {
        let config = ConsumerConfig {
            file: PathBuf::new(),
            ..Default::default()
        };
        assert!(FileConsumer::new(config).is_err());
    }
}
