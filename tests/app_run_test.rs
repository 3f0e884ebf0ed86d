use rask_event_client::App;
use rask_event_client::sender::encoding;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn file_app(dir: &TempDir, extra: &[&str]) -> App {
    let sink = dir.path().join("out.ndjson");
    let sink = sink.to_string_lossy().to_string();
    let mut args = vec!["rask-event-client", "--consumer", "file", "--file", sink.as_str()];
    args.extend_from_slice(extra);
    App::from_args(args).unwrap()
}

fn written_batches(dir: &TempDir) -> Vec<usize> {
    std::fs::read_to_string(dir.path().join("out.ndjson"))
        .unwrap_or_default()
        .lines()
        .map(|line| encoding::decode_json(line).unwrap().len())
        .collect()
}

#[tokio::test]
async fn test_run_delivers_ndjson_input() {
    let dir = TempDir::new().unwrap();
    let app = file_app(&dir, &["--max-batch-size", "2"]);

    let input: &[u8] = b"{\"event\":\"a\"}\n{\"event\":\"b\"}\n\n{\"event\":\"c\"}\n";
    let summary = app.run(input, CancellationToken::new()).await.unwrap();

    assert_eq!(summary.queued, 3);
    assert_eq!(summary.skipped, 0);
    assert!(summary.delivered);
    assert!(!summary.interrupted);
    assert_eq!(written_batches(&dir), vec![2, 1]);
}

#[tokio::test]
async fn test_run_skips_lines_that_are_not_objects() {
    let dir = TempDir::new().unwrap();
    let app = file_app(&dir, &[]);

    let input: &[u8] = b"{\"event\":\"a\"}\nnot json\n[1,2]\n42\n{\"event\":\"b\"}";
    let summary = app.run(input, CancellationToken::new()).await.unwrap();

    assert_eq!(summary.queued, 2);
    assert_eq!(summary.skipped, 3);
    assert_eq!(written_batches(&dir), vec![2]);
}

#[tokio::test]
async fn test_run_overflow_flushes_before_eof() {
    let dir = TempDir::new().unwrap();
    let app = file_app(&dir, &["--max-queue-size", "3"]);

    let input = "{\"n\":1}\n".repeat(5);
    let summary = app.run(input.as_bytes(), CancellationToken::new()).await.unwrap();

    assert_eq!(summary.queued, 5);
    assert_eq!(written_batches(&dir), vec![4, 1]);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let app = file_app(&dir, &[]);
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let input: &[u8] = b"{\"event\":\"a\"}\n";
    let summary = app.run(input, shutdown).await.unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.queued, 0);
    assert!(summary.delivered);
    assert!(written_batches(&dir).is_empty());
}

#[tokio::test]
async fn test_run_with_unknown_consumer_fails() {
    let app = App::from_args(["rask-event-client", "--consumer", "kafka"]).unwrap();
    let input: &[u8] = b"";
    assert!(app.run(input, CancellationToken::new()).await.is_err());
}
