//! vela-queue: inspect and tidy a persisted vela job snapshot.
//!
//! Operates on the JSON snapshot file the queue writes. Jobs that were
//! processing when the snapshot was taken are never in the file.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use vela_core::defaults::STATE_FILE;
use vela_core::{EventBus, Job, JobStatus};
use vela_jobs::JobQueue;
use vela_store::JsonFileSnapshotStore;

#[derive(Parser)]
#[command(name = "vela-queue")]
#[command(author, version, about = "Inspect and tidy the vela job queue")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the job snapshot file
    #[arg(long, env = "VELA_STATE_FILE", default_value = STATE_FILE)]
    state: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List jobs in queue order
    List {
        /// Only show jobs with this status (pending, completed, failed)
        #[arg(short, long)]
        status: Option<String>,

        /// Print the jobs as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show job counts by status
    Stats,

    /// Remove completed jobs
    ClearCompleted,

    /// Remove every job
    ClearAll,

    /// Remove one job by id
    Remove {
        /// Job id
        id: Uuid,
    },
}

/// Log to stderr, or to `LOG_FILE` when set, so stdout carries only command
/// output. `LOG_FORMAT=json` switches to JSON lines; `RUST_LOG` overrides the
/// default filter.
fn init_tracing() -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vela_jobs=info,vela_store=info".into());

    let (writer, guard) = match std::env::var_os("LOG_FILE").map(PathBuf::from) {
        Some(path) => {
            let dir = path.parent().unwrap_or(Path::new("."));
            let file_name = path.file_name().unwrap_or(OsStr::new("vela-queue.log"));
            let (non_blocking, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(guard.is_none())
        .with_writer(writer);

    let registry = tracing_subscriber::registry().with(env_filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json") {
        registry.with(layer.json()).init();
    } else {
        registry.with(layer).init();
    }
    guard
}

fn print_jobs(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs.");
        return;
    }
    println!(
        "{:<36}  {:<19}  {:<10}  {:>8}  {:>9}  ERROR",
        "ID", "TYPE", "STATUS", "PROGRESS", "ITEMS"
    );
    for job in jobs {
        println!(
            "{:<36}  {:<19}  {:<10}  {:>7}%  {:>9}  {}",
            job.id,
            job.job_type,
            job.status,
            job.progress,
            format!("{}/{}", job.processed_items, job.total_items),
            job.error.as_deref().unwrap_or("")
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let store = Arc::new(JsonFileSnapshotStore::new(&cli.state));
    let queue = JobQueue::restore(store, EventBus::default())
        .await
        .with_context(|| format!("failed to load job snapshot {}", cli.state.display()))?;

    match cli.command {
        Commands::List { status, json } => {
            let filter = status.as_deref().map(str::parse::<JobStatus>).transpose()?;
            let jobs: Vec<Job> = queue
                .jobs()
                .into_iter()
                .filter(|job| filter.map_or(true, |s| job.status == s))
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else {
                print_jobs(&jobs);
            }
        }
        Commands::Stats => {
            let stats = queue.stats();
            println!("pending:    {}", stats.pending);
            println!("completed:  {}", stats.completed);
            println!("failed:     {}", stats.failed);
            println!("total:      {}", stats.total);
        }
        Commands::ClearCompleted => {
            let removed = queue
                .clear_completed()
                .await
                .with_context(|| format!("failed to update {}", cli.state.display()))?;
            info!(removed, state = %cli.state.display(), "Cleared completed jobs");
            println!("Removed {removed} completed job(s).");
        }
        Commands::ClearAll => {
            let removed = queue
                .clear_all()
                .await
                .with_context(|| format!("failed to update {}", cli.state.display()))?;
            info!(removed, state = %cli.state.display(), "Cleared all jobs");
            println!("Removed {removed} job(s).");
        }
        Commands::Remove { id } => {
            let removed = queue
                .remove_job(id)
                .await
                .with_context(|| format!("failed to update {}", cli.state.display()))?;
            if !removed {
                anyhow::bail!("no job with id {id}");
            }
            println!("Removed job {id}.");
        }
    }
    Ok(())
}
