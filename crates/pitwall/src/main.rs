use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use pitconf::PitwallConfig;
use pitwall::{server, telemetry};

/// Lap segmentation and range queries over recorded racing telemetry
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file, replacing ./pitwall.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database file (overrides config)
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Print the effective configuration and where it came from
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = PitwallConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.bind.http_port = port;
    }
    if let Some(database) = cli.database {
        config.paths.database = Some(database);
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::ShowConfig => {
            for file in &sources.files {
                println!("# loaded: {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env: {}", var);
            }
            print!("{}", config.to_toml());
            Ok(())
        }
        Command::Serve => {
            let guard = telemetry::init(&config.telemetry)
                .context("Failed to initialize telemetry")?;
            tracing::debug!(files = ?sources.files, env = ?sources.env_overrides, "Configuration loaded");

            let result = server::run(config).await;
            guard.shutdown();
            result
        }
    }
}
