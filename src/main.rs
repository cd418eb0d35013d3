//! Binary entry point for trawl.
//!
//! This binary provides the CLI interface for exploring development history.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::time::Duration;
use trawl::observability;
use trawl::services::SessionBackendFactory;
use trawl::storage::{HistoryDocument, SessionBackendType, SqliteHistoryStore};
use trawl::{EventFilter, ExplorationService, SessionHandle, SessionId, TrawlConfig};

/// Trawl - iterative deep exploration of development history.
#[derive(Parser)]
#[command(name = "trawl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Ask a question and explore until an answer is assembled.
    Ask {
        /// The question.
        query: String,

        /// Project scope to search.
        #[arg(short, long, default_value = "default")]
        scope: String,
    },

    /// Print a persisted session's events as JSON lines.
    Audit {
        /// Session ID.
        session_id: String,
    },

    /// List persisted sessions.
    Sessions,

    /// Load conversations and commits into the history database.
    Ingest {
        /// JSON document with `conversations` and `commits`.
        file: PathBuf,
    },
}

/// Main entry point.
fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match TrawlConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init_from_settings(&config.logging, cli.verbose) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(command: Commands, config: &TrawlConfig) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Ask { query, scope } => cmd_ask(config, &query, &scope),
        Commands::Audit { session_id } => cmd_audit(config, session_id),
        Commands::Sessions => cmd_sessions(config),
        Commands::Ingest { file } => cmd_ingest(config, &file),
    }
}

/// Ask command.
fn cmd_ask(
    config: &TrawlConfig,
    query: &str,
    scope: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = ExplorationService::from_config(config)?;
    let session = service.start_session(query, scope)?;

    let stop = session.stop_flag();
    ctrlc::set_handler(move || {
        if !stop.swap(true, Ordering::SeqCst) {
            eprintln!("\nStopping after the current iteration...");
        }
    })?;

    let outcome = std::thread::scope(|s| {
        let run = s.spawn(|| service.run_to_convergence(&session));
        stream_partial_answers(&service, &session, &run, config.exploration.synthesis_interval());
        run.join()
            .unwrap_or_else(|_| Err(trawl::Error::OperationFailed {
                operation: "run_to_convergence".to_string(),
                cause: "exploration thread panicked".to_string(),
            }))
    })?;

    let answer = service.finalize(&session)?;
    println!("{answer}");
    println!();
    println!(
        "session {} ({}, {} iteration{})",
        session.id(),
        outcome.state,
        outcome.iterations,
        if outcome.iterations == 1 { "" } else { "s" }
    );
    Ok(())
}

/// Logs each new draft while the loop runs.
fn stream_partial_answers<T>(
    service: &ExplorationService,
    session: &SessionHandle,
    run: &std::thread::ScopedJoinHandle<'_, T>,
    interval: Duration,
) {
    let poll = interval.min(Duration::from_millis(500));
    let mut last: Option<String> = None;
    while !run.is_finished() {
        std::thread::sleep(poll);
        let current = service.current_answer(session);
        if current.is_some() && current != last {
            if let Some(draft) = &current {
                tracing::info!(draft = %draft, "Partial answer");
            }
            last = current;
        }
    }
}

/// Audit command.
fn cmd_audit(config: &TrawlConfig, session_id: String) -> Result<(), Box<dyn std::error::Error>> {
    let factory = SessionBackendFactory::from_config(config);
    let (log, _) = factory.open_existing(&SessionId::new(session_id))?;
    for event in log.read(&EventFilter::all())? {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

/// Sessions command.
fn cmd_sessions(config: &TrawlConfig) -> Result<(), Box<dyn std::error::Error>> {
    let factory = SessionBackendFactory::from_config(config);
    if factory.backend() == SessionBackendType::Memory {
        println!("Session storage is in-memory; set [storage].backend = \"sqlite\" to keep sessions.");
        return Ok(());
    }
    let sessions = factory.list_sessions()?;
    if sessions.is_empty() {
        println!("No persisted sessions.");
        return Ok(());
    }
    for (id, events) in sessions {
        println!("{id}\t{events} events");
    }
    Ok(())
}

/// Ingest command.
fn cmd_ingest(config: &TrawlConfig, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(file)?;
    let document: HistoryDocument = serde_json::from_str(&contents)?;
    let path = config.history_db_path();
    let store = SqliteHistoryStore::open(&path)?;
    let stats = store.ingest(&document)?;
    println!(
        "Ingested {} conversations ({} turns) and {} commits into {}",
        stats.conversations,
        stats.turns,
        stats.commits,
        path.display()
    );
    Ok(())
}
