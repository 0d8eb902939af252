//! tamdbctl: Command-line interface for the TamDB query service.
//!
//! Queries per-bucket means from a running server and prints them as a
//! table or as JSON.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Command-line interface for the TamDB query service.
#[derive(Parser)]
#[command(name = "tamdbctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Server address (tcp://host:port or unix:///path)
    #[arg(short, long, env = "TAMDB_ADDRESS", default_value = "tcp://127.0.0.1:9999")]
    address: String,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the per-bucket means of a field
    Query {
        /// Database name as registered on the server
        database: String,
        /// Table and field as table:field (a bare name is used for both)
        series: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Query { database, series } => {
            commands::query::run(&cli.address, &database, &series, cli.output).await?;
        }
    }

    Ok(())
}
