mod animal;
mod config_cmd;
mod journal;
mod sync_cmd;

pub use animal::{AnimalCommand, AnimalSubcommand};
pub use config_cmd::ConfigCommand;
pub use journal::{JournalCommand, JournalSubcommand};
pub use sync_cmd::{SyncCommand, SyncSubcommand};

use clap::ValueEnum;
use serde::Serialize;
use showtrack_core::{DeleteOutcome, EntityId, Record};
use std::io::{self, Write};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Sync state shown next to a record: `deleted` for tombstones.
fn status_label<E>(record: &Record<E>) -> String {
    if record.deleted {
        "deleted".to_string()
    } else {
        record.sync_status.to_string()
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Trailer printed under a record in text output.
fn print_sync_details<E>(record: &Record<E>) {
    println!();
    println!("ID:       {}", record.id);
    println!("Status:   {}", status_label(record));
    println!("Version:  {}", record.version);
    println!("Updated:  {}", record.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(synced_at) = record.synced_at {
        println!("Synced:   {}", synced_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if record.id.is_local() {
        println!("\nNot yet on the server; it will sync when the backend is reachable.");
    }
}

/// Asks for `[y/N]` confirmation on stdin.
fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

fn print_delete_outcome(noun: &str, id: &EntityId, outcome: DeleteOutcome) {
    match outcome {
        DeleteOutcome::Confirmed => println!("Deleted {}: {}", noun, id),
        DeleteOutcome::Pending => println!(
            "Deleted {} locally: {} (will sync when the backend is reachable)",
            noun, id
        ),
    }
}

/// Splits comma-separated values and drops blanks.
fn split_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Patch value for an optional field: `--clear` wins over a new value.
fn clearable<T: Clone>(value: &Option<T>, clear: bool) -> Option<Option<T>> {
    if clear {
        Some(None)
    } else {
        value.clone().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clearable() {
        assert_eq!(clearable(&Some(3), false), Some(Some(3)));
        assert_eq!(clearable(&Some(3), true), Some(None));
        assert_eq!(clearable::<u32>(&None, false), None);
    }

    #[test]
    fn test_split_list_accepts_repeats_and_commas() {
        let values = vec!["AS.01, AS.02".to_string(), " ".to_string(), "AS.07".to_string()];
        assert_eq!(split_list(&values), vec!["AS.01", "AS.02", "AS.07"]);
    }
}
