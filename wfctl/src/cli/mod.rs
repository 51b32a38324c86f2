mod runs;
mod submit;

use crate::{
    conf::{self, LogFormat},
    tracking::{self, TrackingStore},
};
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(name = "wfctl")]
#[clap(about = "wfctl submits pipeline runs to a batch backend and tracks them.")]
#[clap(
    long_about = "wfctl submits pipeline runs to a batch backend and tracks them.\n\n Every submission stages its \
    input under a fresh run identifier, hands the workflow runner a deterministic command line and records the run \
    in the tracking store. Runs can then be listed, scanned, updated, soft deleted and restored."
)]
#[clap(version)]
struct Cli {
    /// Set configuration path; if empty default paths are used
    #[clap(long, value_name = "PATH")]
    config_path: Option<String>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Stage an uploaded input file and submit a run of the configured pipeline.
    Submit {
        /// Tag or commit of the pipeline repository to run.
        #[arg(long)]
        revision: String,

        /// Key of the uploaded input file, relative to the upload prefix.
        #[arg(long)]
        input_file: String,
    },

    /// Inspect and manage tracked runs.
    Runs(runs::RunsSubcommands),
}

struct CliHarness {
    config: conf::Config,
}

impl CliHarness {
    async fn tracking(&self) -> Result<TrackingStore> {
        TrackingStore::open(&self.config.tracking)
            .await
            .context("Could not open tracking store")
    }
}

/// Prints a value as pretty JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parses timestamps given on the command line, e.g. "2024-01-31 23:59:59".
fn parse_timestamp(value: &str) -> Result<NaiveDateTime, String> {
    tracking::record::parse_timestamp(value).map_err(|e| {
        format!(
            "could not parse '{value}' as a timestamp; expected format '{}'; {e}",
            tracking::record::TIMESTAMP_FORMAT
        )
    })
}

fn init_logging(config: &conf::General) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("could not parse log_level '{}'", config.log_level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match config.log_format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("could not install log subscriber; {e}"))
}

/// init the CLI and appropriately run the correct command.
pub async fn init() -> Result<()> {
    let args = Cli::parse();

    let config = conf::Config::load(args.config_path.as_deref())
        .context("Could not load configuration")?;

    init_logging(&config.general)?;

    let cli = CliHarness { config };

    match args.command {
        Commands::Submit {
            revision,
            input_file,
        } => cli.submit(revision, input_file).await,
        Commands::Runs(runs) => cli.runs(runs.command).await,
    }
}
