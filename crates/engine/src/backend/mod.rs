//! Encode backend boundary.
//!
//! The engine never encodes; it starts a backend session and consumes the
//! events the backend publishes on the scheduler's event channel. Every
//! event carries the job id it belongs to, so log errors from a scan for
//! one job can never be attributed to another job's encode.

pub mod cli;

pub use cli::CliBackend;

use crate::job::EncodeJob;
use std::path::Path;
use tokio::sync::mpsc;

/// One title discovered by a backend scan.
#[derive(Debug, Clone, PartialEq)]
pub struct TitleInfo {
    /// Title index within the source.
    pub index: u32,
    /// Title duration in seconds.
    pub duration_secs: f64,
    /// Number of chapters in the title.
    pub chapter_count: u32,
}

/// Which phase of a job a backend log error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPhase {
    Scan,
    Encode,
}

/// Events a backend publishes while working on a job.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// A scan finished; `titles` is empty when nothing usable was found.
    ScanCompleted {
        job_id: String,
        titles: Vec<TitleInfo>,
    },
    /// Progress within one pass. `pass` is -1 for the subtitle scan pass,
    /// 1 and 2 for encode passes. A negative `eta_secs` means the backend
    /// has not warmed up enough to estimate.
    Progress {
        job_id: String,
        pass: i32,
        fraction: f64,
        current_fps: f64,
        average_fps: f64,
        eta_secs: f64,
    },
    /// The backend logged an error line while working on this job.
    LogError {
        job_id: String,
        phase: LogPhase,
        message: String,
    },
    /// The backend session ended. `backend_error` is its own verdict; the
    /// scheduler still validates the output before trusting it.
    Completed { job_id: String, backend_error: bool },
}

impl BackendEvent {
    /// Job id the event belongs to.
    pub fn job_id(&self) -> &str {
        match self {
            BackendEvent::ScanCompleted { job_id, .. }
            | BackendEvent::Progress { job_id, .. }
            | BackendEvent::LogError { job_id, .. }
            | BackendEvent::Completed { job_id, .. } => job_id,
        }
    }
}

/// Contract the scheduler drives encode work through.
///
/// Start calls are non-blocking: implementations spawn their own work and
/// publish `BackendEvent`s on the given sender. Pause/resume keep the
/// session alive; stop tears it down and must still end in a
/// `Completed` event.
pub trait EncodeBackend: Send + Sync {
    fn start_scan(
        &self,
        job_id: &str,
        source: &Path,
        preview_count: u32,
        title_hint: Option<u32>,
        events: mpsc::Sender<BackendEvent>,
    );

    fn start_encode(&self, job: &EncodeJob, events: mpsc::Sender<BackendEvent>);

    fn pause(&self, job_id: &str);

    fn resume(&self, job_id: &str);

    fn stop(&self, job_id: &str);
}
