use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod auto_sync;
mod commands;
mod config;

use app::App;
use auto_sync::try_auto_sync;
use commands::{
    AnimalCommand, AnimalSubcommand, ConfigCommand, JournalCommand, JournalSubcommand,
    SyncCommand, SyncSubcommand,
};
use config::Config;

#[derive(Parser)]
#[command(name = "showtrack")]
#[command(version)]
#[command(about = "Offline-first livestock journal and animal records", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage livestock journal entries
    Journal(JournalCommand),

    /// Manage project animals
    Animal(AnimalCommand),

    /// Sync with the backend
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Save config path for `config init`
    let cli_config_path = cli.config.clone();

    let config = Config::load(cli.config)?;

    let command = match &cli.command {
        Some(command) => command,
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
    };

    // Config commands never open the database
    if let Commands::Config(cmd) = command {
        return cmd.run(&config, cli_config_path);
    }

    let app = App::open(&config).await?;
    let cancel = CancellationToken::new();

    let result = execute_command(command, &app, &config, &cancel).await;

    // Auto-sync AFTER write commands (only if command succeeded)
    if result.is_ok() && is_write_command(command) {
        try_auto_sync(&app, &config).await;
    }

    result
}

async fn execute_command(
    command: &Commands,
    app: &App,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Journal(cmd) => cmd.run(&app.journal, cancel).await,
        Commands::Animal(cmd) => cmd.run(&app.animals, cancel).await,
        Commands::Sync(cmd) => cmd.run(app, config, cancel).await,
        Commands::Config(cmd) => cmd.run(config, None),
    }
}

/// Returns true if the command changes local data and should sync afterwards.
fn is_write_command(cmd: &Commands) -> bool {
    matches!(
        cmd,
        Commands::Journal(j) if matches!(j.command,
            JournalSubcommand::Create { .. }
            | JournalSubcommand::Update { .. }
            | JournalSubcommand::Delete { .. })
    ) || matches!(
        cmd,
        Commands::Animal(a) if matches!(a.command,
            AnimalSubcommand::Create { .. }
            | AnimalSubcommand::Update { .. }
            | AnimalSubcommand::Delete { .. })
    ) || matches!(
        cmd,
        Commands::Sync(s) if matches!(s.command, SyncSubcommand::Retry { .. })
    )
}
