//! HandBrakeCLI-compatible subprocess backend.
//!
//! Builds and runs backend commands, turning the tool's scan output and
//! `Encoding: task t of n, p.pp %` progress lines into backend events.
//! The parsers are pure functions so they can be tested without the tool
//! installed.

use crate::backend::{BackendEvent, EncodeBackend, LogPhase, TitleInfo};
use crate::job::{EncodeJob, RangeSelection};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One parsed progress line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressLine {
    pub task: u32,
    pub task_count: u32,
    pub percent: f64,
    pub current_fps: Option<f64>,
    pub average_fps: Option<f64>,
    pub eta_secs: Option<f64>,
}

/// Subprocess-driving backend. One child process per active session,
/// tracked by job id so pause/resume/stop can signal it.
pub struct CliBackend {
    command: PathBuf,
    sessions: Mutex<HashMap<String, u32>>,
}

impl CliBackend {
    pub fn new(command: PathBuf) -> Self {
        Self {
            command,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn session_pid(&self, job_id: &str) -> Option<u32> {
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .get(job_id)
            .copied()
    }

    fn register_session(&self, job_id: &str, pid: u32) {
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .insert(job_id.to_string(), pid);
    }

    fn clear_session(&self, job_id: &str) {
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .remove(job_id);
    }
}

/// Build the scan command: probe every title with the requested preview
/// count. The tool writes scan results to stderr.
pub fn build_scan_command(command: &Path, source: &Path, preview_count: u32) -> Command {
    let mut cmd = Command::new(command);
    cmd.arg("-i").arg(source);
    cmd.arg("--scan");
    cmd.arg("--title").arg("0");
    cmd.arg("--previews").arg(format!("{}:0", preview_count));
    cmd
}

/// Build the encode command for a job.
pub fn build_encode_command(command: &Path, job: &EncodeJob) -> Command {
    let mut cmd = Command::new(command);
    cmd.arg("-i").arg(&job.source_path);
    cmd.arg("-o").arg(&job.output_path);
    cmd.arg("--preset").arg(&job.profile);
    cmd.arg("--title").arg(job.title.to_string());

    match job.range {
        RangeSelection::All => {}
        RangeSelection::Chapters { start, end } => {
            cmd.arg("--chapters").arg(format!("{}-{}", start, end));
        }
        RangeSelection::Seconds { start, end } => {
            cmd.arg("--start-at").arg(format!("seconds:{}", start));
            cmd.arg("--stop-at").arg(format!("seconds:{}", end - start));
        }
        RangeSelection::Frames { start, end } => {
            cmd.arg("--start-at").arg(format!("frames:{}", start));
            cmd.arg("--stop-at").arg(format!("frames:{}", end - start));
        }
    }

    if !job.audio_tracks.is_empty() {
        cmd.arg("--audio").arg(join_indexes(&job.audio_tracks));
    }
    if !job.subtitle_tracks.is_empty() {
        cmd.arg("--subtitle").arg(join_indexes(&job.subtitle_tracks));
    }
    if job.two_pass {
        cmd.arg("--two-pass");
    }
    if job.subtitle_scan {
        cmd.arg("--subtitle-scan");
    }

    cmd
}

fn join_indexes(indexes: &[u32]) -> String {
    indexes
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Map the tool's 1-based task number to the pass numbering used by the
/// cost model: -1 for the subtitle scan task, then 1 and 2.
pub fn map_task_to_pass(task: u32, subtitle_scan: bool) -> i32 {
    if subtitle_scan {
        if task <= 1 {
            -1
        } else {
            (task - 1) as i32
        }
    } else {
        task.max(1) as i32
    }
}

/// Parse `00h12m23s` into seconds.
pub fn parse_eta_hms(eta: &str) -> Option<f64> {
    let rest = eta.strip_suffix('s')?;
    let (hours, rest) = rest.split_once('h')?;
    let (minutes, seconds) = rest.split_once('m')?;
    let hours: f64 = hours.parse().ok()?;
    let minutes: f64 = minutes.parse().ok()?;
    let seconds: f64 = seconds.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse `HH:MM:SS` into seconds.
pub fn parse_duration_hms(duration: &str) -> Option<f64> {
    let mut parts = duration.trim().splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse one progress line:
/// `Encoding: task 1 of 2, 5.11 %` optionally followed by
/// `(67.61 fps, avg 67.59 fps, ETA 00h12m23s)`.
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let rest = line.trim().strip_prefix("Encoding: task ")?;
    let (task, rest) = rest.split_once(" of ")?;
    let (count, rest) = rest.split_once(',')?;
    let (percent, rest) = rest.trim().split_once(" %")?;

    let mut parsed = ProgressLine {
        task: task.trim().parse().ok()?,
        task_count: count.trim().parse().ok()?,
        percent: percent.trim().parse().ok()?,
        current_fps: None,
        average_fps: None,
        eta_secs: None,
    };

    if let Some(stats) = rest
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
    {
        for part in stats.split(',') {
            let part = part.trim();
            if let Some(avg) = part.strip_prefix("avg ") {
                parsed.average_fps = avg
                    .strip_suffix(" fps")
                    .and_then(|v| v.trim().parse().ok());
            } else if let Some(eta) = part.strip_prefix("ETA ") {
                parsed.eta_secs = parse_eta_hms(eta.trim());
            } else if let Some(fps) = part.strip_suffix(" fps") {
                parsed.current_fps = fps.trim().parse().ok();
            }
        }
    }

    Some(parsed)
}

/// Parse the tool's scan output into discovered titles.
///
/// Recognizes the section layout
/// `+ title N:` / `  + duration: HH:MM:SS` / `  + chapters:` followed by
/// numbered chapter entries. Any other `+ name:` header ends the chapter
/// section.
pub fn parse_scan_titles(output: &str) -> Vec<TitleInfo> {
    let mut titles: Vec<TitleInfo> = Vec::new();
    let mut in_chapters = false;

    for line in output.lines() {
        let trimmed = line.trim();

        if let Some(rest) = trimmed.strip_prefix("+ title ") {
            if let Some(index) = rest.strip_suffix(':').and_then(|v| v.trim().parse().ok()) {
                titles.push(TitleInfo {
                    index,
                    duration_secs: 0.0,
                    chapter_count: 0,
                });
                in_chapters = false;
            }
        } else if let Some(rest) = trimmed.strip_prefix("+ duration: ") {
            if let Some(title) = titles.last_mut() {
                title.duration_secs = parse_duration_hms(rest).unwrap_or(0.0);
            }
            in_chapters = false;
        } else if trimmed == "+ chapters:" {
            in_chapters = true;
        } else if let Some(rest) = trimmed.strip_prefix("+ ") {
            if in_chapters && rest.chars().next().map_or(false, |c| c.is_ascii_digit()) {
                if let Some(title) = titles.last_mut() {
                    title.chapter_count += 1;
                }
            } else if rest.ends_with(':') {
                in_chapters = false;
            }
        }
    }

    titles
}

/// Send a POSIX signal to the child via `kill`.
fn signal_process(pid: u32, signal: &str) {
    let result = Command::new("kill")
        .arg(signal)
        .arg(pid.to_string())
        .status();
    if let Err(e) = result {
        warn!(pid, signal, error = %e, "failed to signal backend process");
    }
}

/// Forward backend log lines, surfacing error lines as events.
async fn pump_log_lines(
    stream: impl tokio::io::AsyncRead + Unpin,
    job_id: String,
    phase: LogPhase,
    events: mpsc::Sender<BackendEvent>,
) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.contains("ERROR") {
            let _ = events
                .send(BackendEvent::LogError {
                    job_id: job_id.clone(),
                    phase,
                    message: line,
                })
                .await;
        } else {
            debug!(job_id = %job_id, line = %line, "backend log");
        }
    }
}

/// Read progress output, which the tool terminates with carriage returns
/// rather than newlines, and publish progress events.
async fn pump_progress(
    stream: impl tokio::io::AsyncRead + Unpin,
    job: EncodeJob,
    events: mpsc::Sender<BackendEvent>,
) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\r', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&buf);
        if let Some(parsed) = parse_progress_line(line.trim()) {
            let event = BackendEvent::Progress {
                job_id: job.id.clone(),
                pass: map_task_to_pass(parsed.task, job.subtitle_scan),
                fraction: parsed.percent / 100.0,
                current_fps: parsed.current_fps.unwrap_or(0.0),
                average_fps: parsed.average_fps.unwrap_or(0.0),
                eta_secs: parsed.eta_secs.unwrap_or(-1.0),
            };
            if events.send(event).await.is_err() {
                break;
            }
        }
    }
}

impl EncodeBackend for CliBackend {
    fn start_scan(
        &self,
        job_id: &str,
        source: &Path,
        preview_count: u32,
        _title_hint: Option<u32>,
        events: mpsc::Sender<BackendEvent>,
    ) {
        let cmd = build_scan_command(&self.command, source, preview_count);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            let output = tokio::process::Command::from(cmd)
                .stdin(Stdio::null())
                .output()
                .await;

            let titles = match output {
                Ok(output) => {
                    let text = String::from_utf8_lossy(&output.stderr);
                    for line in text.lines() {
                        if line.contains("ERROR") {
                            let _ = events
                                .send(BackendEvent::LogError {
                                    job_id: job_id.clone(),
                                    phase: LogPhase::Scan,
                                    message: line.to_string(),
                                })
                                .await;
                        }
                    }
                    parse_scan_titles(&text)
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "backend scan failed to start");
                    Vec::new()
                }
            };

            let _ = events
                .send(BackendEvent::ScanCompleted { job_id, titles })
                .await;
        });
    }

    fn start_encode(&self, job: &EncodeJob, events: mpsc::Sender<BackendEvent>) {
        let mut cmd = tokio::process::Command::from(build_encode_command(&self.command, job));
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let job = job.clone();
        let job_id = job.id.clone();

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "backend encode failed to start");
                let events = events.clone();
                tokio::spawn(async move {
                    let _ = events
                        .send(BackendEvent::Completed {
                            job_id,
                            backend_error: true,
                        })
                        .await;
                });
                return;
            }
        };

        if let Some(pid) = child.id() {
            self.register_session(&job_id, pid);
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        if let Some(stdout) = stdout {
            tokio::spawn(pump_progress(stdout, job.clone(), events.clone()));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(pump_log_lines(
                stderr,
                job_id.clone(),
                LogPhase::Encode,
                events.clone(),
            ));
        }

        tokio::spawn(async move {
            let backend_error = match child.wait().await {
                Ok(status) => !status.success(),
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "waiting on backend process failed");
                    true
                }
            };
            let _ = events
                .send(BackendEvent::Completed {
                    job_id,
                    backend_error,
                })
                .await;
        });
    }

    fn pause(&self, job_id: &str) {
        if let Some(pid) = self.session_pid(job_id) {
            signal_process(pid, "-STOP");
        }
    }

    fn resume(&self, job_id: &str) {
        if let Some(pid) = self.session_pid(job_id) {
            signal_process(pid, "-CONT");
        }
    }

    fn stop(&self, job_id: &str) {
        if let Some(pid) = self.session_pid(job_id) {
            signal_process(pid, "-TERM");
        }
        self.clear_session(job_id);
    }
}
