//! LedgerFlow CLI - statement ingestion and categorization pipeline

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;
mod server;

use commands::{categories, forget, gap, logs, process, status};

/// LedgerFlow - load bank statements, dedup them, categorize what's new
#[derive(Parser)]
#[command(name = "ledgerflow", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest statement files and categorize new descriptions
    Process {
        /// Institution the files come from (amex, wealthsimple)
        institution: String,
        /// File paths relative to the configured files root
        files: Vec<String>,
        /// Re-ingest files even if they were loaded before
        #[arg(long)]
        force: bool,
        /// Keep running rounds until no uncategorized descriptions remain
        #[arg(long)]
        until_empty: bool,
        /// Upper bound on rounds with --until-empty
        #[arg(long, default_value = "10")]
        max_rounds: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove every row loaded from a file and rebuild the transforms
    Forget {
        /// File path relative to the configured files root
        path: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Seed the category taxonomy (no-op when already seeded)
    InitCategories {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List descriptions that have no cached category yet
    Gap {
        /// Maximum descriptions to list (defaults to pipeline.gapLimit)
        #[arg(short, long)]
        limit: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show warehouse status and summary
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// View and manage the run log
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },

    /// Serve the pipeline over HTTP
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080", env = "PORT")]
        port: u16,
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
    },
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ledgerflow=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let result = run(cli);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Process {
            institution,
            files,
            force,
            until_empty,
            max_rounds,
            json,
        } => process::run(&institution, files, force, until_empty, max_rounds, json),
        Commands::Forget { path, json } => forget::run(&path, json),
        Commands::InitCategories { json } => categories::run(json),
        Commands::Gap { limit, json } => gap::run(limit, json),
        Commands::Status { json } => status::run(json),
        Commands::Logs { command } => logs::run(command),
        Commands::Serve { port, host } => server::serve(&host, port),
    }
}
