use clap::{Args, Subcommand};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use super::OutputFormat;
use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Initialize configuration file
    Init,
}

const DEFAULT_CONFIG: &str = r#"# showtrack configuration

# Path to SQLite database (default: platform data dir, showtrack/showtrack.db)
# database_path: showtrack.db

backend:
  # url: https://api.showtrack.example/v1
  # api_key: your-api-key
  # owner_id: your-student-id
  # enrichment_url: https://api.showtrack.example/v1/webhooks/enrich

sync:
  # Replay queued writes after every create/update/delete
  auto_sync: false
  max_attempts: 5
  backoff_base_secs: 2
  backoff_max_secs: 300
  poll_interval_secs: 60
  write_budget_secs: 5
  data_timeout_secs: 10
  ai_timeout_secs: 60
  # stale_after_secs: 3600
"#;

impl ConfigCommand {
    pub fn run(
        &self,
        config: &Config,
        cli_config_path: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => print_config(config),
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                let config_path = cli_config_path.unwrap_or_else(Config::default_config_path);

                if config_path.exists() {
                    println!("Config file already exists: {}", config_path.display());
                    println!("Use 'showtrack config show' to view current configuration.");
                    return Ok(());
                }

                if let Some(parent) = config_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                let mut file = fs::File::create(&config_path)?;
                file.write_all(DEFAULT_CONFIG.as_bytes())?;

                println!("Created config file: {}", config_path.display());
                println!("\nEdit this file to customize your settings.");
                Ok(())
            }
        }
    }
}

fn print_config(config: &Config) {
    println!("Configuration");
    println!("=============\n");

    if let Some(path) = &config.config_file {
        println!("Config file: {}", path.display());
    } else {
        println!(
            "Config file: {} (not found)",
            Config::default_config_path().display()
        );
    }
    println!();

    println!("database_path: {}", config.database_path.value.display());
    println!("  source: {}", config.database_path.source);
    println!();

    let backend = &config.backend;
    println!("backend:");
    println!("  url: {}", backend.url.as_deref().unwrap_or("(not set)"));
    println!(
        "  api_key: {}",
        if backend.api_key.is_some() {
            "********"
        } else {
            "(not set)"
        }
    );
    println!("  owner_id: {}", backend.scope());
    println!(
        "  enrichment_url: {}",
        backend.enrichment_url().as_deref().unwrap_or("(not set)")
    );
    println!();

    let sync = &config.sync;
    println!("sync:");
    println!("  auto_sync: {}", sync.auto_sync);
    println!("  max_attempts: {}", sync.max_attempts);
    println!(
        "  backoff: {}s doubling to {}s",
        sync.backoff_base_secs, sync.backoff_max_secs
    );
    println!("  poll_interval_secs: {}", sync.poll_interval_secs);
    println!("  write_budget_secs: {}", sync.write_budget_secs);
    println!("  data_timeout_secs: {}", sync.data_timeout_secs);
    println!("  ai_timeout_secs: {}", sync.ai_timeout_secs);
    match sync.stale_after_secs {
        Some(secs) => println!("  stale_after_secs: {}", secs),
        None => println!("  stale_after_secs: (never)"),
    }
}
