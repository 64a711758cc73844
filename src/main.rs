//! Command-line front end for the substrate ingestion pipeline.
//!
//! The pipeline core treats the CLI/HTTP surface as an external
//! collaborator (`spec.md` "Out of scope"); this binary is one such
//! collaborator, wiring [`substrate::Pipeline`] to a handful of
//! subcommands for local use and scripting.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use substrate::config::SubstrateConfig;
use substrate::{ContentId, Hash128, Pipeline};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "substrate", about = "Content-addressed, geometrically indexed ingestion substrate")]
struct Cli {
    /// Path to the YAML configuration file. Falls back to built-in
    /// defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a single text file and block until it is durable.
    IngestFile { path: PathBuf },
    /// Ingest literal text from the command line, hashed into a content id.
    IngestText { text: String },
    /// Ingest a model package directory (`vocab.txt` + `embeddings.f32`).
    IngestModel { package_dir: PathBuf },
    /// Block until all previously enqueued batches have committed.
    Flush,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run() {
        tracing::error!(error = %err, "substrate command failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SubstrateConfig::from_file(path)?,
        None => SubstrateConfig::default(),
    };
    let pipeline = Pipeline::open(config)?;

    match cli.command {
        Command::IngestFile { path } => {
            let stats = pipeline.ingest_file(&path)?;
            pipeline.flush_wait();
            println!("{stats:?}");
        }
        Command::IngestText { text } => {
            let content_id: ContentId = Hash128::digest(text.as_bytes());
            let stats = pipeline.ingest_text(content_id, &text)?;
            pipeline.flush_wait();
            println!("{stats:?}");
        }
        Command::IngestModel { package_dir } => {
            let stats = pipeline.ingest_model(&package_dir)?;
            pipeline.flush_wait();
            println!("{stats:?}");
        }
        Command::Flush => {
            pipeline.flush_wait();
            println!("{:?}", pipeline.flusher_stats());
        }
    }

    Ok(())
}
