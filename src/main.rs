//! Forum-Ripple main entry point
//!
//! This is the command-line interface for the Forum-Ripple activity crawler.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use forum_ripple::config::load_config_with_hash;
use forum_ripple::crawler::{
    CrawlError, Crawler, Intervals, OperationReport, Scheduler, SharedStorage, ThreadEvent,
};
use forum_ripple::state::ActivityHandle;
use forum_ripple::storage::{open_storage, Storage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

/// Forum-Ripple: a polite forum activity crawler
///
/// Forum-Ripple tracks characters, their threads and their dialogue on a
/// server-rendered forum, pacing every request so the board's flood
/// protection is never triggered.
#[derive(Parser, Debug)]
#[command(name = "forum-ripple")]
#[command(version)]
#[command(about = "A polite forum activity crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler: discovery, reconciliation and profile refresh
    Run,

    /// Crawl every thread of one tracked character
    Threads {
        /// Character (user) id
        id: String,
    },

    /// Crawl a single thread, as after a new-post notification
    Thread {
        /// Thread id
        id: String,

        /// User who just posted in the thread
        #[arg(long)]
        user: Option<String>,

        /// Forum the thread lives in
        #[arg(long)]
        forum: Option<String>,
    },

    /// Crawl one profile
    Profile {
        /// User id
        id: String,
    },

    /// Track a new character: profile crawl, then thread crawl
    Register {
        /// User id
        id: String,
    },

    /// Probe user ids for new characters
    Discover,

    /// Register new characters from the member list
    Members,

    /// Reconcile all threads (admin export when available, else HTML)
    Reconcile,

    /// Print everything stored for a character
    Show {
        /// Character id
        id: String,
    },

    /// Clear the quote scrape log so every thread is quote-scraped again
    ResetQuoteLog,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let storage = open_storage(Path::new(&config.storage.database_path))
        .with_context(|| format!("failed to open {}", config.storage.database_path))?;
    let storage: SharedStorage = Arc::new(Mutex::new(storage));

    if let Command::Show { id } = &cli.command {
        return handle_show(&storage, id);
    }

    let crawler = Crawler::new(Arc::new(config), storage, ActivityHandle::default())
        .context("failed to build crawler")?;

    match cli.command {
        Command::Run => handle_run(crawler).await,
        Command::Threads { id } => print_report(crawler.crawl_character_threads(&id).await),
        Command::Thread { id, user, forum } => {
            let event = ThreadEvent {
                thread_id: id,
                user_id: user,
                forum_id: forum,
            };
            print_report(crawler.crawl_single_thread(&event).await)
        }
        Command::Profile { id } => print_report(crawler.crawl_profile(&id).await),
        Command::Register { id } => print_report(crawler.register_character(&id).await),
        Command::Discover => print_report(crawler.discover_characters().await),
        Command::Members => print_report(crawler.discover_from_member_list().await),
        Command::Reconcile => print_report(crawler.reconcile_all().await),
        Command::ResetQuoteLog => print_report(
            crawler
                .reset_quote_log()
                .map(|removed| serde_json::json!({ "removed": removed })),
        ),
        Command::Show { .. } => Ok(()),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("forum_ripple=info,warn"),
            1 => EnvFilter::new("forum_ripple=debug,info"),
            2 => EnvFilter::new("forum_ripple=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Prints an operation result as a JSON report on stdout
fn print_report<T: Serialize>(result: std::result::Result<T, CrawlError>) -> Result<()> {
    let report = OperationReport::from(result);
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

/// Runs the scheduler until the process is stopped
async fn handle_run(crawler: Crawler) -> Result<()> {
    let intervals = Intervals::from_config(&crawler.config().crawl);
    tracing::info!(
        "Scheduler starting (discovery: {:?}, threads: {:?}, profiles: {:?})",
        intervals.discovery,
        intervals.threads,
        intervals.profiles
    );

    let scheduler = Scheduler::new(Arc::new(crawler), intervals);
    tokio::select! {
        _ = scheduler.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            tracing::info!("Shutting down");
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct CharacterView {
    character: forum_ripple::storage::CharacterRecord,
    fields: std::collections::BTreeMap<String, String>,
    threads: Vec<forum_ripple::storage::CharacterThreadRecord>,
    quotes: Vec<forum_ripple::storage::QuoteRecord>,
}

/// Prints everything stored for a character
fn handle_show(storage: &SharedStorage, id: &str) -> Result<()> {
    let storage = storage
        .lock()
        .map_err(|_| anyhow::anyhow!("storage lock poisoned"))?;

    let Some(character) = storage.get_character(id)? else {
        println!("{}", serde_json::json!({ "error": format!("character {} is not tracked", id) }));
        std::process::exit(1);
    };

    let view = CharacterView {
        fields: storage.profile_fields(id)?,
        threads: storage.threads_for(id)?,
        quotes: storage.quotes_for(id)?,
        character,
    };
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
