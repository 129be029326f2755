//! CLI entry point for encodeq.
//!
//! Loads configuration, restores the persisted queue, wires the
//! scheduler to the backend adapter, status server, store task, and
//! auto-pause watcher, then runs until interrupted.

use clap::Parser;
use encodeq::{
    find_video_sources, load_or_empty, run_startup_checks, run_status_server, run_store_task,
    AutoPauseBridge, CliBackend, Config, EncodeJob, HeadlessPrompt, JsonQueueStore,
    NoopSystemActions, QueueScheduler, QueueStore, ResourceAllocator, SchedulerOptions,
    SourceType,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// encodeq - encode queue scheduler driving a HandBrakeCLI-compatible backend
#[derive(Parser, Debug)]
#[command(name = "encodeq")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Directory to batch-enqueue video files from at startup
    #[arg(long)]
    batch_dir: Option<PathBuf>,

    /// Directory batch outputs are written to (defaults to the source's directory)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Encoding profile applied to batch-enqueued jobs
    #[arg(long, default_value = "Fast 1080p30")]
    profile: String,

    /// Start the queue immediately after startup
    #[arg(long, default_value = "false")]
    start: bool,

    /// Skip startup checks (backend availability). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

/// Output path for a batch-discovered source: the source's file name with
/// an mkv extension, in the output directory when one was given.
fn batch_output_path(source: &Path, output_dir: Option<&PathBuf>) -> PathBuf {
    let mut output = match (output_dir, source.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => source.to_path_buf(),
    };
    output.set_extension("mkv");
    output
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = if args.config.exists() {
        match Config::load(&args.config) {
            Ok(config) => config,
            Err(e) => {
                error!(config = %args.config.display(), error = %e, "failed to load configuration");
                return ExitCode::FAILURE;
            }
        }
    } else {
        warn!(config = %args.config.display(), "config file not found, using defaults");
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    };

    if args.skip_checks {
        warn!("skipping startup checks (--skip-checks enabled)");
    } else if let Err(e) = run_startup_checks(&config) {
        error!(error = %e, "startup check failed");
        return ExitCode::FAILURE;
    }

    let allocator = Arc::new(ResourceAllocator::new(&config.pools));
    let bridge = Arc::new(AutoPauseBridge::new(&config.auto_pause));
    let backend = Arc::new(CliBackend::new(config.backend.command.clone()));
    let store: Arc<dyn QueueStore> =
        Arc::new(JsonQueueStore::new(config.queue.state_file.clone()));

    let options = SchedulerOptions {
        when_done: config.queue.when_done,
        preview_count: config.queue.preview_count,
        stop_timeout: Duration::from_secs(config.queue.stop_timeout_secs),
    };

    let (mut scheduler, handle) = QueueScheduler::new(
        backend,
        allocator,
        bridge.clone(),
        Arc::new(HeadlessPrompt),
        Arc::new(NoopSystemActions),
        options,
    );

    // Repopulate pending jobs from the previous session
    let restored = load_or_empty(store.as_ref(), &config.queue.state_file);
    if !restored.is_empty() {
        scheduler.restore(restored);
    }

    // Persistence task: saves every queue revision
    tokio::spawn(run_store_task(handle.queue_revisions(), store));

    // Status endpoint for observers
    let snapshot = handle.snapshot();
    let status_port = config.status.port;
    tokio::spawn(async move {
        info!(port = status_port, "status server on http://127.0.0.1:{}/status", status_port);
        if let Err(e) = run_status_server(snapshot, status_port).await {
            error!(error = %e, "status server error");
        }
    });

    // Auto-pause watcher
    tokio::spawn(bridge.run(handle.bridge_sender()));

    // Batch enqueue under the batch conflict policy
    if let Some(batch_dir) = &args.batch_dir {
        let sources = find_video_sources(batch_dir);
        info!(dir = %batch_dir.display(), count = sources.len(), "batch enqueue");
        for source in sources {
            let output = batch_output_path(&source, args.output_dir.as_ref());
            let job = EncodeJob::new(
                source,
                SourceType::File,
                1,
                args.profile.clone(),
                output,
            );
            if handle
                .enqueue(job, false, config.queue.batch_conflict_policy)
                .await
                .is_err()
            {
                error!("scheduler stopped during batch enqueue");
                return ExitCode::FAILURE;
            }
        }
    }

    if args.start || args.batch_dir.is_some() {
        if handle.start_queue().await.is_err() {
            error!("scheduler stopped before the queue could start");
            return ExitCode::FAILURE;
        }
    }

    scheduler.run().await;
    ExitCode::SUCCESS
}
