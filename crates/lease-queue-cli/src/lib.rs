//! # Lease Queue CLI
//!
//! Operator command-line interface over the lease-queue library, for queues
//! carrying JSON payloads.
//!
//! This module provides CLI commands for:
//! - Publishing payloads
//! - Leasing, completing and abandoning single entries
//! - Printing queue statistics
//! - Running a worker that prints entries until interrupted
//! - Deleting a queue together with its dead-letter queue

use clap::{Parser, Subcommand, ValueEnum};
use lease_queue::{LeaseQueue, LeaseQueueSettings, QueueEntry, QueueError, QueueStats, WorkQueue};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Queue client used by every command
pub type JsonQueue = LeaseQueue<Value>;

// ============================================================================
// CLI Structure
// ============================================================================

/// Lease Queue CLI - operate a visibility-timeout work queue
#[derive(Parser, Debug)]
#[command(name = "lease-queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operate a visibility-timeout work queue")]
pub struct Cli {
    /// Settings file path
    #[arg(short, long, env = "LEASE_QUEUE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Publish a JSON payload
    Enqueue {
        /// Payload as a JSON document
        payload: String,
    },

    /// Lease one entry and print it
    Dequeue {
        /// Seconds to wait for an entry; 0 polls once
        #[arg(short, long, default_value = "0")]
        wait: u64,

        /// Complete the entry after printing it
        #[arg(long, conflicts_with = "abandon")]
        complete: bool,

        /// Abandon the entry after printing it
        #[arg(long)]
        abandon: bool,
    },

    /// Show queue statistics
    Stats {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print entries as they arrive until interrupted
    Work {
        /// Leave entries leased instead of completing them
        #[arg(long)]
        no_auto_complete: bool,
    },

    /// Delete the queue and its dead-letter queue
    Delete {
        /// Confirm the deletion
        #[arg(short, long)]
        yes: bool,
    },
}

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON output
    Json,
}

// ============================================================================
// Errors
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Queue(QueueError::ConfigurationError(_) | QueueError::ValidationError(_)) => 1,
            Self::Queue(_) => 2,
            Self::CommandFailed { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
        }
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Parse arguments, set up logging and settings, then run the command
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let queue = load_queue(cli.config.as_deref())?;

    let shutdown = CancellationToken::new();
    cancel_on_interrupt(shutdown.clone());

    let mut stdout = std::io::stdout();
    execute(&queue, cli.command, &shutdown, &mut stdout).await
}

/// Report a failed run through the logger, or straight to `stderr` when the
/// logger was never installed
pub fn report_error(error: &CliError, stderr: &mut dyn Write) {
    if tracing::dispatcher::has_been_set() {
        tracing::error!("CLI error: {}", error);
    } else {
        let _ = writeln!(stderr, "Error: {}", error);
    }
}

/// Default filter directive when `RUST_LOG` is not set
pub fn default_log_filter(level: &str) -> String {
    format!("lease_queue={level},lease_queue_cli={level}")
}

fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_log_filter(&cli.log_level)))
        .map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?;

    // Logs go to stderr; stdout carries command output
    let json = cli.json_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text = (!cli.json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .try_init()
        .map_err(|e| CliError::CommandFailed {
            message: format!("failed to install logger: {}", e),
        })
}

/// Build the queue client from the settings file and environment
pub fn load_queue(path: Option<&Path>) -> Result<JsonQueue, CliError> {
    let settings = LeaseQueueSettings::load(path)?;
    info!(
        queue = %settings.queue.name,
        region = %settings.sqs.region,
        "Loaded queue settings"
    );

    Ok(LeaseQueue::from_settings(settings)?)
}

fn cancel_on_interrupt(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                shutdown.cancel();
            }
            Err(e) => warn!(error = %e, "Unable to listen for interrupt signal"),
        }
    });
}

/// Run one command against `queue`, writing its output to `out`
pub async fn execute(
    queue: &JsonQueue,
    command: Commands,
    shutdown: &CancellationToken,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    match command {
        Commands::Enqueue { payload } => execute_enqueue(queue, &payload, out).await,
        Commands::Dequeue {
            wait,
            complete,
            abandon,
        } => execute_dequeue(queue, wait, complete, abandon, shutdown, out).await,
        Commands::Stats { format } => execute_stats(queue, format, out).await,
        Commands::Work { no_auto_complete } => {
            execute_work(queue, !no_auto_complete, shutdown).await
        }
        Commands::Delete { yes } => execute_delete(queue, yes, out).await,
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Parse a command-line payload as JSON
pub fn parse_payload(text: &str) -> Result<Value, CliError> {
    serde_json::from_str(text).map_err(|e| CliError::InvalidArgument {
        arg: "payload".to_string(),
        message: e.to_string(),
    })
}

async fn execute_enqueue(
    queue: &JsonQueue,
    payload: &str,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let value = parse_payload(payload)?;

    match queue.enqueue(value).await? {
        Some(id) => writeln!(out, "{}", id)?,
        None => info!("Payload was not enqueued"),
    }

    Ok(())
}

async fn execute_dequeue(
    queue: &JsonQueue,
    wait: u64,
    complete: bool,
    abandon: bool,
    shutdown: &CancellationToken,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let cancel = shutdown.child_token();
    if wait == 0 {
        cancel.cancel();
    } else {
        let deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(wait)).await;
            deadline.cancel();
        });
    }

    let Some(entry) = queue.dequeue(&cancel).await? else {
        info!(queue = %queue.options().name, "No entry available");
        return Ok(());
    };

    writeln!(out, "{}", entry_json(&entry))?;

    if complete {
        queue.complete(&entry).await?;
        debug!(message_id = %entry.id(), "Completed entry");
    } else if abandon {
        queue.abandon(&entry).await?;
        debug!(message_id = %entry.id(), "Abandoned entry");
    }

    Ok(())
}

async fn execute_stats(
    queue: &JsonQueue,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let stats = queue.get_stats().await?;
    writeln!(out, "{}", format_stats(&stats, format)?)?;
    Ok(())
}

/// Render statistics for display
pub fn format_stats(stats: &QueueStats, format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(stats).map_err(|e| CliError::CommandFailed {
                message: format!("failed to render stats: {}", e),
            })
        }
        OutputFormat::Text => {
            let rows = [
                ("queued", stats.queued),
                ("working", stats.working),
                ("deadletter", stats.deadletter),
                ("enqueued", stats.enqueued),
                ("dequeued", stats.dequeued),
                ("completed", stats.completed),
                ("abandoned", stats.abandoned),
                ("errors", stats.errors),
                ("timeouts", stats.timeouts),
            ];
            Ok(rows
                .iter()
                .map(|(name, value)| format!("{:<11}{}", format!("{}:", name), value))
                .collect::<Vec<_>>()
                .join("\n"))
        }
    }
}

/// Run a printing worker until `shutdown` fires
pub async fn execute_work(
    queue: &JsonQueue,
    auto_complete: bool,
    shutdown: &CancellationToken,
) -> Result<(), CliError> {
    info!(
        queue = %queue.options().name,
        auto_complete,
        "Worker running; press Ctrl+C to stop"
    );

    let worker = queue.start_working(print_entry, auto_complete, shutdown.clone());
    worker.join().await.map_err(|e| CliError::CommandFailed {
        message: format!("worker task failed: {}", e),
    })?;

    let stats = queue.get_stats().await?;
    info!(
        completed = stats.completed,
        errors = stats.errors,
        "Worker stopped"
    );

    Ok(())
}

async fn print_entry(entry: Arc<QueueEntry<Value>>, _cancel: CancellationToken) -> anyhow::Result<()> {
    let line = entry_json(&entry).to_string();
    writeln!(std::io::stdout().lock(), "{}", line)?;
    Ok(())
}

async fn execute_delete(queue: &JsonQueue, yes: bool, out: &mut dyn Write) -> Result<(), CliError> {
    if !yes {
        return Err(CliError::InvalidArgument {
            arg: "yes".to_string(),
            message: "deleting a queue requires --yes".to_string(),
        });
    }

    queue.delete_queue().await?;
    writeln!(out, "Deleted queue {}", queue.options().name)?;
    Ok(())
}

fn entry_json(entry: &QueueEntry<Value>) -> Value {
    serde_json::json!({
        "id": entry.id().as_str(),
        "attempt": entry.attempt(),
        "enqueued_at": entry.enqueued_at().as_datetime().to_rfc3339(),
        "payload": entry.value(),
    })
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
