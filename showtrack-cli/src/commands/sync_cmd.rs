//! Sync CLI commands: replay the queue, inspect it, retry failed writes.

use clap::{Args, Subcommand};
use serde_json::json;
use showtrack_core::sync::{DrainReport, LocalStore, PendingOperation};
use showtrack_core::{
    AnimalRecord, EntityId, JournalEntry, ReplayReport, SyncEntity, SyncStats,
};
use tokio_util::sync::CancellationToken;

use super::OutputFormat;
use crate::app::App;
use crate::config::Config;

/// Sync with the backend
#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    pub command: SyncSubcommand,
}

#[derive(Subcommand)]
pub enum SyncSubcommand {
    /// Replay queued writes and deliver enrichment requests now
    Now {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show backend configuration and queue state
    Status {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Reset failed writes so the next sync tries them again
    Retry {
        /// Entity ID to retry
        #[arg(required_unless_present = "all")]
        id: Option<String>,

        /// Retry every failed write
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },

    /// Keep syncing in the foreground until interrupted
    Watch,
}

impl SyncCommand {
    pub async fn run(
        &self,
        app: &App,
        config: &Config,
        cancel: &CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            SyncSubcommand::Now { format } => sync_now(app, config, format).await,
            SyncSubcommand::Status { format } => status(app, config, format).await,
            SyncSubcommand::Retry { id, all } => retry(app, id.as_deref(), *all).await,
            SyncSubcommand::Watch => watch(app, config, cancel).await,
        }
    }
}

async fn sync_now(
    app: &App,
    config: &Config,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    if matches!(format, OutputFormat::Text) {
        match &config.backend.url {
            Some(url) => println!("Syncing with {}...\n", url),
            None => println!("No backend configured; writes stay queued locally.\n"),
        }
    }

    let journal = app.journal.sync_now().await?;
    let animals = app.animals.sync_now().await?;
    let enrichment = match &app.enrichment {
        Some(worker) => Some(worker.drain().await?),
        None => None,
    };

    match format {
        OutputFormat::Json => {
            let value = json!({
                "journal_entries": report_json(&journal),
                "animals": report_json(&animals),
                "enrichment": enrichment.as_ref().map(|r| json!({
                    "delivered": r.delivered,
                    "failed": r.failed,
                    "dropped": r.dropped,
                    "halted": r.halted,
                })),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            print_report(JournalEntry::KIND, &journal);
            print_report(AnimalRecord::KIND, &animals);
            if let Some(report) = &enrichment {
                print_drain(report);
            }
            println!();
            let enrichment_halted = enrichment.as_ref().is_some_and(|r| r.halted);
            if journal.halted || animals.halted || enrichment_halted {
                println!("Sync stopped: no valid API key. Check `backend.api_key`.");
            } else if journal.failed + animals.failed > 0 {
                println!("Some writes are still queued and will be retried.");
            } else {
                println!("Sync complete.");
            }
        }
    }
    Ok(())
}

fn report_json(report: &ReplayReport) -> serde_json::Value {
    json!({
        "attempted": report.attempted,
        "synced": report.synced,
        "failed": report.failed,
        "exhausted": report.exhausted,
        "skipped": report.skipped,
        "halted": report.halted,
    })
}

fn print_report(kind: &str, report: &ReplayReport) {
    if report.attempted == 0 && report.skipped == 0 && !report.halted {
        println!("  ✓ {} up to date", kind);
        return;
    }

    let mark = if report.failed + report.exhausted > 0 || report.halted {
        "✗"
    } else {
        "✓"
    };
    println!(
        "  {} {}: {} synced, {} retrying, {} failed, {} parked",
        mark, kind, report.synced, report.failed, report.exhausted, report.skipped
    );
}

fn print_drain(report: &DrainReport) {
    if report.halted {
        println!("  ✗ enrichment: waiting for a valid API key");
        return;
    }
    if report.delivered + report.failed + report.dropped == 0 {
        return;
    }
    println!(
        "  enrichment: {} delivered, {} retrying, {} dropped",
        report.delivered, report.failed, report.dropped
    );
}

async fn status(
    app: &App,
    config: &Config,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let journal = app.journal.status().await?;
    let animals = app.animals.status().await?;
    let failed_journal = failed_operations::<JournalEntry>(app).await?;
    let failed_animals = failed_operations::<AnimalRecord>(app).await?;

    match format {
        OutputFormat::Json => {
            let failed: Vec<serde_json::Value> = failed_journal
                .iter()
                .map(failed_json::<JournalEntry>)
                .chain(failed_animals.iter().map(failed_json::<AnimalRecord>))
                .collect();
            let value = json!({
                "backend_url": config.backend.url,
                "configured": config.backend.is_configured(),
                "owner_id": config.backend.scope(),
                "auto_sync": config.sync.auto_sync,
                "journal_entries": stats_json(&journal),
                "animals": stats_json(&animals),
                "outbox": journal.outbox,
                "failed": failed,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("Sync Configuration");
            println!("==================");
            println!();

            match &config.backend.url {
                Some(url) => println!("Backend:   {}", url),
                None => println!("Backend:   (not configured)"),
            }
            println!(
                "API key:   {}",
                if config.backend.api_key.is_some() {
                    "configured"
                } else {
                    "missing"
                }
            );
            println!("Owner:     {}", config.backend.scope());
            println!(
                "Auto-sync: {}",
                if config.sync.auto_sync {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            println!();

            println!("Queue");
            println!("-----");
            print_stats(JournalEntry::KIND, &journal);
            print_stats(AnimalRecord::KIND, &animals);
            println!("  enrichment outbox: {}", journal.outbox);

            if !failed_journal.is_empty() || !failed_animals.is_empty() {
                println!();
                println!("Failed writes (run `showtrack sync retry <ID>` or `--all`):");
                for op in &failed_journal {
                    print_failed(JournalEntry::KIND, op);
                }
                for op in &failed_animals {
                    print_failed(AnimalRecord::KIND, op);
                }
            }
        }
    }
    Ok(())
}

async fn failed_operations<E: SyncEntity>(
    app: &App,
) -> Result<Vec<PendingOperation<E>>, Box<dyn std::error::Error>> {
    let max_attempts = app.policy.max_attempts;
    let operations = LocalStore::<E>::dequeue_operations(&app.store).await?;
    Ok(operations
        .into_iter()
        .filter(|op| op.is_exhausted(max_attempts))
        .collect())
}

fn stats_json(stats: &SyncStats) -> serde_json::Value {
    json!({
        "pending": stats.pending,
        "retrying": stats.retrying,
        "error": stats.error,
    })
}

fn failed_json<E: SyncEntity>(op: &PendingOperation<E>) -> serde_json::Value {
    json!({
        "kind": E::KIND,
        "id": op.target_id,
        "operation": op.kind(),
        "attempts": op.attempt_count,
        "last_error": op.last_error,
    })
}

fn print_stats(kind: &str, stats: &SyncStats) {
    println!(
        "  {}: {} pending, {} retrying, {} failed",
        kind, stats.pending, stats.retrying, stats.error
    );
}

fn print_failed<E>(kind: &str, op: &PendingOperation<E>) {
    println!(
        "  {} {} ({}, {} attempt{}): {}",
        kind,
        op.target_id,
        op.kind(),
        op.attempt_count,
        if op.attempt_count == 1 { "" } else { "s" },
        op.last_error.as_deref().unwrap_or("unknown error")
    );
}

async fn retry(app: &App, id: Option<&str>, all: bool) -> Result<(), Box<dyn std::error::Error>> {
    if all {
        let count = app.journal.retry_all_failed().await? + app.animals.retry_all_failed().await?;
        if count == 0 {
            println!("No failed writes.");
        } else {
            println!(
                "Queued {} failed write{} for retry.",
                count,
                if count == 1 { "" } else { "s" }
            );
        }
        return Ok(());
    }

    let Some(id) = id else {
        return Err("Provide an ID or --all.".into());
    };
    let id = EntityId::from(id);
    if app.journal.retry_failed(&id).await? || app.animals.retry_failed(&id).await? {
        println!("Queued {} for retry.", id);
        Ok(())
    } else {
        Err(format!("No failed write for '{}'", id).into())
    }
}

async fn watch(
    app: &App,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.cancel();
        }
    });

    match &config.backend.url {
        Some(url) => println!("Watching {}; press Ctrl-C to stop.", url),
        None => println!(
            "No backend configured; nothing will leave this device. Press Ctrl-C to stop."
        ),
    }

    let journal = app.journal.coordinator();
    let animals = app.animals.coordinator();
    let enrichment = async {
        if let Some(worker) = &app.enrichment {
            worker.run(app.policy.poll_interval, cancel.clone()).await;
        }
    };

    tokio::join!(
        journal.run(cancel.clone()),
        animals.run(cancel.clone()),
        enrichment
    );

    println!("Stopped.");
    Ok(())
}
