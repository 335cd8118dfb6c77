use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ferry_core::impls::{InMemoryOutboxStore, LoggingBus};
use ferry_core::{NewEvent, OutboxBuilder, RelayConfig};

/// Demo relay: captures a few events into an in-memory outbox and relays
/// them to a log-only bus.
#[derive(Debug, Parser)]
#[command(name = "ferry", version, about)]
struct Args {
    /// TOML file with relay settings; flags below override it.
    #[arg(long, env = "FERRY_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "FERRY_BATCH_SIZE")]
    batch_size: Option<usize>,

    #[arg(long, env = "FERRY_MAX_RETRIES")]
    max_retries: Option<u32>,

    #[arg(long, env = "FERRY_POLL_INTERVAL_SECS")]
    poll_interval_secs: Option<u64>,

    #[arg(long, env = "FERRY_TOPIC_PREFIX")]
    topic_prefix: Option<String>,

    /// Run this many ticks and exit instead of relaying until Ctrl-C.
    #[arg(long)]
    ticks: Option<u32>,
}

fn load_config(args: &Args) -> anyhow::Result<RelayConfig> {
    let base = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            RelayConfig::from_toml_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => RelayConfig::default(),
    };

    let mut builder = RelayConfig::builder()
        .batch_size(args.batch_size.unwrap_or(base.batch_size()))
        .max_retries(args.max_retries.unwrap_or(base.max_retries()))
        .poll_interval(
            args.poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(base.poll_interval()),
        )
        .publish_timeout(base.publish_timeout())
        .tick_budget(base.tick_budget())
        .claim_ttl(base.claim_ttl())
        .dead_letter_permanent_failures(base.dead_letter_permanent_failures());
    builder = match &args.topic_prefix {
        Some(prefix) => builder.topic_prefix(prefix.clone()),
        None => builder.topic_prefix(base.topic_prefix()),
    };
    Ok(builder.build()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    info!(
        batch_size = config.batch_size(),
        max_retries = config.max_retries(),
        topic_prefix = config.topic_prefix(),
        "starting ferry"
    );

    let outbox = OutboxBuilder::new()
        .store(Arc::new(InMemoryOutboxStore::new()))
        .bus(Arc::new(LoggingBus::new()))
        .config(config)
        .build()?;

    let capture = outbox.capture();
    capture
        .save_event::<(), _>(
            "User",
            "u-1",
            "CREATED",
            None,
            Some(serde_json::json!({"name": "Ada"})),
        )
        .await;
    capture
        .save_event(
            "User",
            "u-1",
            "RENAMED",
            Some(serde_json::json!({"name": "Ada"})),
            Some(serde_json::json!({"name": "Ada L."})),
        )
        .await;
    capture
        .record(
            NewEvent::new("Order", "o-9", "PLACED")
                .tenant("acme")
                .new_value(&serde_json::json!({"total": 42})),
        )
        .await;

    let relay = outbox.relay();
    match args.ticks {
        Some(n) => {
            for _ in 0..n {
                let report = relay.tick().await?;
                info!(?report, "tick");
            }
        }
        None => {
            let handle = Arc::clone(&relay).spawn();
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            info!("shutdown requested");
            handle.shutdown_and_join().await;
        }
    }

    let status = outbox.status(20).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
