//! encodeq
//!
//! Encode queue scheduling and progress-aggregation engine: accepts
//! transcode job descriptions, runs them against an external encode
//! backend one at a time, folds heterogeneous per-pass progress into an
//! overall completion estimate and ETA, arbitrates scarce hardware
//! encoder slots, and handles pause/resume/stop and partial failure
//! across the queue.

pub mod autopause;
pub mod backend;
pub mod conflict;
pub mod cost;
pub mod intake;
pub mod job;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod scheduler;
pub mod startup;
pub mod status_server;
pub mod store;

pub use encodeq_config as config;
pub use encodeq_config::Config;

pub use autopause::{AutoPauseBridge, BridgeEvent};
pub use backend::{BackendEvent, CliBackend, EncodeBackend, LogPhase, TitleInfo};
pub use conflict::{auto_rename, resolve_output_path, ConflictChoice, HeadlessPrompt, PromptHandler};
pub use cost::{job_cost, EncodePass, JobWork, SUBTITLE_SCAN_COST_FACTOR};
pub use intake::{find_video_sources, is_video_file, VIDEO_EXTENSIONS};
pub use job::{EncodeJob, EncodeResult, EncodeStatus, QueuedJob, RangeSelection, SourceType};
pub use pool::{HardwarePool, ResourceAllocator};
pub use progress::{
    format_eta, new_shared_snapshot, EncodeClock, JobProgress, ProgressAggregator, QueueSnapshot,
    SharedSnapshot, TaskbarState,
};
pub use queue::JobQueue;
pub use scheduler::{
    NoopSystemActions, QueueScheduler, SchedulerCommand, SchedulerError, SchedulerHandle,
    SchedulerOptions, SystemActions,
};
pub use startup::{
    check_backend_available, ensure_state_dir, run_startup_checks, validate_pools, StartupError,
};
pub use status_server::{create_status_router, run_status_server, ServerError};
pub use store::{
    load_or_empty, queue_channel, run_store_task, JsonQueueStore, QueueStore, QueuedJobRecord,
};
