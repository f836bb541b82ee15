use anyhow::{bail, Context, Result};
use flowlink::config::load_config;
use flowlink::message::MessageEnvelope;
use flowlink::metrics::{run_reporter, CounterRegistry};
use flowlink::{ChannelSink, Throttler};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "flowlink.toml";

/// `flowlink [--config <path>]`
fn config_path() -> Result<PathBuf> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => Ok(PathBuf::from(DEFAULT_CONFIG_PATH)),
        Some("--config") | Some("-c") => args
            .next()
            .map(PathBuf::from)
            .context("--config requires a path"),
        Some(other) => bail!("Unknown argument '{}'", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, stdout carries admitted payloads
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowlink=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = config_path()?;
    let mut config = load_config(&path)?;
    config.apply_env();

    info!("Flowlink starting with config {}", path.display());

    let counters = Arc::new(CounterRegistry::new());
    let throttler = Throttler::new(config.throttler.clone(), counters.clone())
        .context("Failed to create throttler")?;

    let (sink, mut sink_rx) = ChannelSink::new("stdout");
    throttler.connect_to(Arc::new(sink));

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(msg) = sink_rx.recv().await {
            stdout.write_all(msg.payload()).await?;
            stdout.write_all(b"\n").await?;
            if let Err(e) = msg.ack_done() {
                warn!("Failed to ack written message: {}", e);
            }
        }
        stdout.flush().await
    });

    let reporter = (config.pipeline.report_interval_seconds > 0).then(|| {
        tokio::spawn(run_reporter(
            counters.clone(),
            config.pipeline.report_interval_seconds,
        ))
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<MessageEnvelope>(&line) {
            Ok(envelope) => {
                if let Err(e) = throttler.admit(envelope.into()) {
                    warn!("Failed to forward message: {}", e);
                }
            }
            Err(e) => warn!("Skipping malformed line: {}", e),
        }
    }

    // Dropping the throttler closes the sink channel and ends the writer
    drop(throttler);
    writer
        .await
        .context("Writer task panicked")?
        .context("Failed to write stdout")?;

    if let Some(reporter) = reporter {
        reporter.abort();
    }

    let snapshot = counters.snapshot();
    info!(
        counters = %serde_json::to_string(&snapshot.counters)?,
        "Flowlink finished"
    );

    Ok(())
}
