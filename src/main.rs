use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use log::debug;

mod config;
mod gateway;
mod manager;
mod messages;
mod mfrc522;
mod mqtt;
mod rfid;
mod scanner;

#[derive(Parser, Debug)]
#[command(version, about = "Relay RFID tag reads from a reader to the mesh and on to the cloud")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the tag reader and publish what it sees on the mesh
    Reader,
    /// Republish mesh tag events to the cloud
    Gateway,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::formatted_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let cli = Cli::parse();

    let config_contents = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;
    let config: config::AppConfig = toml::de::from_str(&config_contents)
        .with_context(|| format!("parsing {}", cli.config.display()))?;

    debug!("Config: {:?}", config);

    let core = manager::Manager::new(config);
    match cli.command {
        Command::Reader => core.run_reader().await,
        Command::Gateway => core.run_gateway().await,
    }
}
