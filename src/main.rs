use anyhow::{Context, bail};
use clap::Parser;
use rask_event_client::app::{self, App, Config, setup_logging_safe, spawn_signal_handler};
use tokio::io::BufReader;
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // clap prints help or version and exits
    if args
        .iter()
        .skip(1)
        .any(|arg| matches!(arg.as_str(), "--help" | "-h" | "--version" | "-V"))
    {
        Config::parse_from(&args);
        return Ok(());
    }

    let app = App::from_args(&args).context("Configuration error")?;
    let config = app.config();
    setup_logging_safe(config.log_level, config.log_format)?;

    let input = config.input.clone();
    let shutdown = spawn_signal_handler();
    let summary = match input {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            app.run(BufReader::new(file), shutdown).await?
        }
        None => app.run(BufReader::new(tokio::io::stdin()), shutdown).await?,
    };

    if !summary.delivered {
        error!(queued = summary.queued, "Some records could not be delivered");
        bail!("rask-event-client {}: delivery incomplete", app::get_version());
    }
    Ok(())
}
