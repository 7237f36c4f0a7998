use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use filingscope::config::Settings;
use filingscope::error::Result;
use filingscope::import;
use filingscope::persist::SqliteStore;
use filingscope::server::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "filingscope", about = "Filtered, progressively loaded NYC job filings")]
struct Args {
    /// Config file used instead of ./filingscope.{toml,json,yaml}
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP and WebSocket API (default).
    Serve,
    /// Fill the database with synthetic filings.
    Seed {
        #[arg(long, default_value_t = 10_000)]
        count: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Import a CSV export of the dataset.
    ImportCsv { path: PathBuf },
}

async fn run(args: Args) -> Result<()> {
    let settings = Settings::load(args.config.as_deref())?;
    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let state = AppState::from_settings(&settings)?;
            let sweeper = server::spawn_sweeper(
                Arc::clone(&state),
                Duration::from_secs(settings.loading.sweep_interval_secs),
                chrono::Duration::seconds(settings.loading.max_session_age_secs as i64),
            );
            let served = server::serve(state, &settings.server.bind).await;
            sweeper.abort();
            served
        }
        Command::Seed { count, seed } => {
            let store = SqliteStore::open(&settings.persistence_mode())?;
            let inserted = tokio::task::spawn_blocking(move || import::generate_test_data(&store, count, seed)).await??;
            info!(inserted, "seeding finished");
            Ok(())
        }
        Command::ImportCsv { path } => {
            let store = SqliteStore::open(&settings.persistence_mode())?;
            let summary = tokio::task::spawn_blocking(move || import::import_csv(&store, &path)).await??;
            info!(read = summary.read, inserted = summary.inserted, "import finished");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!(error = %e, "filingscope failed");
        std::process::exit(1);
    }
}
