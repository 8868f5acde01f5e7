//! Vehicle Emissions Engine CLI
//!
//! Trains and updates artifact generations, evaluates and queries the
//! current generation, and replays datasets as a telemetry stream.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{generations, inference, training, Workspace};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Vehicle Emissions Engine CLI
#[derive(Parser)]
#[command(name = "emx")]
#[command(author, version, about = "CLI for the Vehicle Emissions Predictive Engine", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to emissions.toml when present)
    #[arg(long, short, env = "EMISSIONS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Artifact store directory, overriding the configured one
    #[arg(long, env = "EMISSIONS_STORE")]
    pub store: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train every model on a dataset and commit a new generation
    Train {
        /// Dataset file (.csv, .json or .jsonl)
        dataset: PathBuf,
    },

    /// Continue boosting the current regressor on new rows
    Update {
        /// Dataset file (.csv, .json or .jsonl)
        dataset: PathBuf,

        /// Boosting rounds to append (defaults to the configured value)
        #[arg(long)]
        rounds: Option<usize>,
    },

    /// Report RMSE and R² of the current regressor on a labelled dataset
    Evaluate {
        /// Dataset file (.csv, .json or .jsonl)
        dataset: PathBuf,
    },

    /// Run one reading through the current generation
    Infer(inference::RecordArgs),

    /// Replay dataset rows as a telemetry stream
    Simulate {
        /// Dataset file (.csv, .json or .jsonl)
        dataset: PathBuf,

        /// Maximum number of rows to replay
        #[arg(long, default_value_t = 200)]
        limit: usize,

        /// Pause between readings in milliseconds
        #[arg(long, default_value_t = 1000)]
        delay_ms: u64,
    },

    /// List committed artifact generations
    Generations,

    /// Point CURRENT back at the previous generation
    Rollback,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let ws = Workspace::open(cli.config.as_deref(), cli.store, cli.format)?;

    match cli.command {
        Commands::Train { dataset } => training::train(&ws, &dataset)?,
        Commands::Update { dataset, rounds } => training::update(&ws, &dataset, rounds)?,
        Commands::Evaluate { dataset } => training::evaluate_current(&ws, &dataset)?,
        Commands::Infer(args) => inference::infer(&ws, args)?,
        Commands::Simulate {
            dataset,
            limit,
            delay_ms,
        } => inference::simulate(&ws, &dataset, limit, Duration::from_millis(delay_ms)).await?,
        Commands::Generations => generations::list(&ws)?,
        Commands::Rollback => generations::rollback(&ws)?,
    }

    Ok(())
}
