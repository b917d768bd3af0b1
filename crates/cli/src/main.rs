//! Transit Prediction Aggregator CLI
//!
//! A command-line tool for inspecting a running aggregator, decoding
//! inference correlation ids, and injecting bus messages for testing.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{correlation, pending, publish, status};
use std::path::PathBuf;

/// Transit Prediction Aggregator CLI
#[derive(Parser)]
#[command(name = "tpa")]
#[command(author, version, about = "CLI for the Transit Prediction Aggregator", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via TPA_API_URL env var)
    #[arg(long, env = "TPA_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show engine status and the last sweep
    Status,

    /// List batches awaiting inference responses
    Pending {
        /// Filter by vehicle id
        #[arg(long, short)]
        vehicle: Option<String>,
    },

    /// Decode an inference correlation id (offline)
    Correlation {
        /// Correlation id, e.g. V1_1700000000000-trip42-7-3
        id: String,
    },

    /// Publish JSON messages from a file onto a bus subject
    Publish {
        /// Bus subject, e.g. vehicle-monitor-results
        subject: String,

        /// File with one JSON document, or one JSON message per line
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Offline commands need no client
    if let Commands::Correlation { id } = &cli.command {
        return correlation::decode(id, cli.format);
    }

    let config = config::Config::load()?;
    let client = client::ApiClient::new(&config.resolve_api_url(cli.api_url))?;

    match cli.command {
        Commands::Status => status::show_status(&client, cli.format).await?,
        Commands::Pending { vehicle } => pending::list_pending(&client, vehicle, cli.format).await?,
        Commands::Publish { subject, file } => {
            publish::publish_file(&client, &subject, &file, cli.format).await?
        }
        Commands::Correlation { .. } => {}
    }

    Ok(())
}
