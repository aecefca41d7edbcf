use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use apflow::core::Principal;
use apflow::jobs::models::QueueName;
use apflow::{Config, Engine};

#[derive(Parser)]
#[command(name = "apflow", about = "AP invoice intake and validation engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the engine: worker pools, scheduler, outbox relay
    Run,
    /// Requeue dead jobs from a queue's DLQ
    ReplayDlq {
        /// Queue name (ingestion|processing|validation|export|maintenance)
        queue: QueueName,
        /// Maximum number of jobs to requeue
        #[arg(long, default_value_t = 100)]
        max: usize,
    },
    /// Cancel the workflow run for an invoice
    CancelWorkflow {
        invoice_id: Uuid,
        #[arg(long)]
        reason: String,
    },
    /// Force an idempotency expiry sweep
    SweepIdempotency,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;
    let engine = Arc::new(Engine::builder(config).build().context("building engine")?);

    match cli.command {
        Command::Run => {
            engine.run().await?;
        }
        Command::ReplayDlq { queue, max } => {
            let replayed = engine.queue.replay_dlq(queue, max)?;
            info!(queue = %queue, replayed, "DLQ replay complete");
            engine.pump().await?;
        }
        Command::CancelWorkflow { invoice_id, reason } => {
            let invoice = engine
                .runner
                .cancel(invoice_id, &Principal::system(), &reason)?;
            info!(
                invoice_id = %invoice.id,
                state = %invoice.state,
                "Workflow run cancelled"
            );
        }
        Command::SweepIdempotency => {
            let removed = engine.idempotency.sweep()?;
            info!(removed, "Idempotency sweep complete");
        }
    }
    Ok(())
}
