//! Job types for the encode queue.
//!
//! Defines the immutable job description handed to the queue, the mutable
//! queue wrapper around it, and the terminal result record appended to the
//! completed list.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Kind of source a job encodes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// A single video file.
    File,
    /// A disc folder (VIDEO_TS / BDMV style layout).
    DiscFolder,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::File => write!(f, "file"),
            SourceType::DiscFolder => write!(f, "disc_folder"),
        }
    }
}

/// The portion of the selected title to encode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeSelection {
    /// Encode the whole title.
    All,
    /// Inclusive chapter range.
    Chapters { start: u32, end: u32 },
    /// Time range in seconds.
    Seconds { start: f64, end: f64 },
    /// Frame range.
    Frames { start: u64, end: u64 },
}

/// One unit of queued work. Immutable once encoding has started, except
/// for output-path resolution before start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeJob {
    /// Unique job identifier (UUID).
    pub id: String,
    /// Path to the source file or disc folder.
    pub source_path: PathBuf,
    /// Kind of source.
    pub source_type: SourceType,
    /// Title index within the source.
    pub title: u32,
    /// Portion of the title to encode.
    pub range: RangeSelection,
    /// Name of the encoding profile to apply.
    pub profile: String,
    /// Path the encoded output is written to.
    pub output_path: PathBuf,
    /// Indexes of the chosen audio tracks.
    pub audio_tracks: Vec<u32>,
    /// Indexes of the chosen subtitle tracks.
    pub subtitle_tracks: Vec<u32>,
    /// Length of the selected video range in seconds.
    pub video_length_secs: f64,
    /// Whether the profile performs a two-pass encode.
    pub two_pass: bool,
    /// Whether a subtitle/foreign-audio scan pass runs before the encode.
    pub subtitle_scan: bool,
    /// Whether the backend must re-derive title metadata before encoding.
    /// False only when the enqueuing layer already holds scan results.
    pub needs_scan: bool,
    /// Names of the hardware pools this job's encoder/decoder combination
    /// requires a slot in.
    pub required_pools: Vec<String>,
}

impl EncodeJob {
    /// Create a job with a fresh id and the common defaults: whole title,
    /// scan required, no hardware pools.
    pub fn new(
        source_path: PathBuf,
        source_type: SourceType,
        title: u32,
        profile: String,
        output_path: PathBuf,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_path,
            source_type,
            title,
            range: RangeSelection::All,
            profile,
            output_path,
            audio_tracks: Vec::new(),
            subtitle_tracks: Vec::new(),
            video_length_secs: 0.0,
            two_pass: false,
            subtitle_scan: false,
            needs_scan: true,
            required_pools: Vec::new(),
        }
    }
}

/// Terminal status of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodeStatus {
    /// Output produced and validated.
    Succeeded,
    /// Backend error, scan failure, or invalid output.
    Failed,
}

impl std::fmt::Display for EncodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeStatus::Succeeded => write!(f, "succeeded"),
            EncodeStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal record for one completed job. Created once on completion,
/// immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeResult {
    /// Job id the result belongs to.
    pub job_id: String,
    /// Final output path.
    pub destination: PathBuf,
    /// Terminal status.
    pub status: EncodeStatus,
    /// Wall-clock seconds spent encoding, excluding paused time.
    pub encode_secs: f64,
    /// Seconds spent paused.
    pub pause_secs: f64,
    /// Output file size in bytes (0 when the output is missing).
    pub size_bytes: u64,
    /// Backend log file for this job, when one exists.
    pub log_path: Option<PathBuf>,
    /// Failure reason, when status is Failed.
    pub error_reason: Option<String>,
}

/// Queue wrapper around a job: the job itself plus the mutable flags the
/// queue and progress display need.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: EncodeJob,
    /// Whether the user chose the output path by hand (survives persistence).
    pub manual_output_path: bool,
    /// True while this job's backend session is live.
    pub encoding: bool,
    /// UI selection flag, used by remove/reorder operations.
    pub selected: bool,
    /// Per-job progress percent, 0..=100.
    pub percent_complete: f64,
    /// True when this is the only item of the current run. Controls
    /// inline progress-bar visibility only, never scheduling.
    pub only_item: bool,
}

impl QueuedJob {
    pub fn new(job: EncodeJob, manual_output_path: bool) -> Self {
        Self {
            job,
            manual_output_path,
            encoding: false,
            selected: false,
            percent_complete: 0.0,
            only_item: false,
        }
    }
}
