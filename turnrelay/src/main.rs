//! turnrelay - activity record delivery CLI
//!
//! Reads one JSON activity record from stdin, normalizes it, and delivers
//! it to the collector with retry and durable-queue fallback. This is the
//! command a host invokes for the external-command transport; it is also
//! usable by hand to replay the queue (`--flush-only`).
//!
//! The process always exits 0 after a delivery attempt and reports what
//! happened as a JSON status line on stdout (`sent` or `queued`), so a
//! calling hook never fails its turn over telemetry.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};

use turnrelay_core::deliver::{Delivery, DeliveryOutcome, DurableQueue, HttpSink};
use turnrelay_core::payload::{build_payload, normalize_record};
use turnrelay_core::Config;

#[derive(Parser)]
#[command(
    name = "turnrelay",
    about = "Send agent activity records to a collector",
    version
)]
struct Cli {
    /// Collector endpoint (overrides configuration)
    #[arg(long)]
    api_url: Option<String>,

    /// Durable-queue directory (overrides configuration)
    #[arg(long)]
    queue_root: Option<PathBuf>,

    /// Only replay queued records; do not read stdin
    #[arg(long)]
    flush_only: bool,

    /// Config file path (defaults to the XDG config location)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path).context("failed to load configuration")?,
        None => Config::load().context("failed to load configuration")?,
    };

    let _log_guard = turnrelay_core::logging::init(&config.logging)
        .context("failed to initialize logging")?;

    let mut relay_config = config.relay;
    if let Some(api_url) = cli.api_url {
        relay_config.api_url = api_url;
    }
    if let Some(queue_root) = cli.queue_root {
        relay_config.queue_root = Some(queue_root);
    }
    relay_config.validate().context("invalid configuration")?;

    let sink = HttpSink::new(
        &relay_config.api_url,
        Duration::from_secs(relay_config.timeout_secs),
    )
    .context("failed to create HTTP sink")?;
    let delivery = Delivery::new(
        sink,
        &relay_config.backoff_ms,
        DurableQueue::new(relay_config.queue_root()),
    );

    if cli.flush_only {
        let report = delivery.flush_queue().await.context("failed to flush queue")?;
        println!(
            "{}",
            json!({"status": "flushed", "sent": report.sent, "remaining": report.remaining})
        );
        return Ok(());
    }

    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read stdin")?;

    // Empty or undecodable input still produces a fully-defaulted record.
    let record: Value = serde_json::from_str(raw.trim())
        .ok()
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({}));

    let fields = normalize_record(&record, &relay_config.workspace_tag());
    let payload = build_payload(fields);

    match delivery.send(&payload).await {
        DeliveryOutcome::Delivered => {
            // The collector is reachable again: drain anything queued
            // earlier while we can.
            if let Err(e) = delivery.flush_queue().await {
                tracing::warn!(error = %e, "Queue replay after delivery failed");
            }
            println!("{}", json!({"status": "sent"}));
        }
        DeliveryOutcome::Queued | DeliveryOutcome::Lost => {
            println!("{}", json!({"status": "queued"}));
        }
    }

    Ok(())
}
