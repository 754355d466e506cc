//! Datacenter Energy Predictor CLI
//!
//! A command-line tool for resolving metadata selections, inspecting
//! compiled store queries, and examining persisted node sets.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{nodes, query, resolve};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Datacenter Energy Predictor CLI
#[derive(Parser)]
#[command(name = "dcp")]
#[command(author, version, about = "CLI for the Datacenter Energy Predictor", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve a selection against datacenter metadata
    Resolve {
        /// Metadata file: JSON mapping of datacenter name to metadata
        #[arg(long, env = "DCP_METADATA")]
        metadata: String,

        /// Datacenter name
        datacenter: String,

        /// Selection as inline JSON (omit to select everything)
        #[arg(long)]
        selection: Option<String>,

        /// Skip unknown names instead of failing on them
        #[arg(long)]
        lenient: bool,
    },

    /// Print the store queries a selection compiles to
    Query {
        /// Metadata file: JSON mapping of datacenter name to metadata
        #[arg(long, env = "DCP_METADATA")]
        metadata: String,

        /// Datacenter name
        datacenter: String,

        /// Selection as inline JSON (omit to select everything)
        #[arg(long)]
        selection: Option<String>,

        /// Window start, relative (-1h) or absolute
        #[arg(long, default_value = "-1h")]
        starttime: String,

        /// Window end, relative or absolute
        #[arg(long, default_value = "now()")]
        endtime: String,

        /// Aggregation function applied per time bucket
        #[arg(long)]
        aggregation: Option<String>,
    },

    /// Inspect a persisted node-set file
    Nodes {
        /// Node-set JSON file
        file: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Resolve {
            metadata,
            datacenter,
            selection,
            lenient,
        } => {
            resolve::run(&metadata, &datacenter, selection.as_deref(), lenient, cli.format)
                .await?;
        }
        Commands::Query {
            metadata,
            datacenter,
            selection,
            starttime,
            endtime,
            aggregation,
        } => {
            query::run(
                &metadata,
                &datacenter,
                selection.as_deref(),
                &starttime,
                &endtime,
                aggregation.as_deref(),
            )
            .await?;
        }
        Commands::Nodes { file } => {
            nodes::run(&file, cli.format)?;
        }
    }

    Ok(())
}
