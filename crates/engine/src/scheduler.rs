//! Queue scheduler.
//!
//! The scheduler is an actor: commands from the owning surface, events
//! from the backend, and signals from the auto-pause bridge all arrive on
//! channels consumed by one `select!` loop, which is the only place queue
//! state, cost totals, and the shared snapshot are touched. Backend
//! worker threads never write shared state directly.

use crate::autopause::{AutoPauseBridge, BridgeEvent};
use crate::backend::{BackendEvent, EncodeBackend, LogPhase, TitleInfo};
use crate::conflict::{resolve_output_path, PromptHandler};
use crate::cost::{job_cost, EncodePass, JobWork};
use crate::job::{EncodeJob, EncodeResult, EncodeStatus};
use crate::pool::ResourceAllocator;
use crate::progress::{
    format_eta, new_shared_snapshot, EncodeClock, JobProgress, ProgressAggregator, QueueSnapshot,
    SharedSnapshot, TaskbarState,
};
use crate::queue::JobQueue;
use crate::store::QueuedJobRecord;
use encodeq_config::{ConflictPolicy, WhenDone};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Retry cadence while a job start is deferred on a busy hardware pool.
const SLOT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Error type for scheduler handle operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is no longer running")]
    Closed,
}

/// System-level actions run when the queue drains.
pub trait SystemActions: Send + Sync {
    fn sleep(&self);
    fn log_off(&self);
    fn shutdown(&self);
}

/// Logs the requested action without performing it. Embedders supply a
/// real implementation.
#[derive(Debug, Clone, Default)]
pub struct NoopSystemActions;

impl SystemActions for NoopSystemActions {
    fn sleep(&self) {
        info!("queue complete action: sleep (not performed)");
    }

    fn log_off(&self) {
        info!("queue complete action: log off (not performed)");
    }

    fn shutdown(&self) {
        info!("queue complete action: shutdown (not performed)");
    }
}

/// Commands the owning surface sends the scheduler.
#[derive(Debug)]
pub enum SchedulerCommand {
    Enqueue {
        job: EncodeJob,
        manual_output_path: bool,
        policy: ConflictPolicy,
    },
    RemoveSelected {
        ids: Vec<String>,
    },
    MoveToTop {
        ids: Vec<String>,
    },
    MoveToBottom {
        ids: Vec<String>,
    },
    StartQueue,
    Pause,
    Resume,
    StopAll,
}

/// Tunables the scheduler is constructed with.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Action when the queue drains naturally.
    pub when_done: WhenDone,
    /// Preview count passed to backend scans.
    pub preview_count: u32,
    /// How long to wait for the backend's stop acknowledgment before
    /// forcing slot release.
    pub stop_timeout: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            when_done: WhenDone::Nothing,
            preview_count: 10,
            stop_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActivePhase {
    Scanning,
    Encoding,
}

/// The job currently owned by a live backend session.
struct ActiveJob {
    job: EncodeJob,
    work: JobWork,
    phase: ActivePhase,
    held_pools: Vec<String>,
    /// Errors the backend logged during this job's encode phase.
    encode_log_errors: u32,
    clock: EncodeClock,
}

/// Cloneable handle for sending commands and observing state.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<SchedulerCommand>,
    snapshot: SharedSnapshot,
    bridge_events: mpsc::Sender<BridgeEvent>,
    queue_revisions: watch::Receiver<Vec<QueuedJobRecord>>,
}

impl SchedulerHandle {
    pub async fn send(&self, command: SchedulerCommand) -> Result<(), SchedulerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SchedulerError::Closed)
    }

    pub async fn enqueue(
        &self,
        job: EncodeJob,
        manual_output_path: bool,
        policy: ConflictPolicy,
    ) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Enqueue {
            job,
            manual_output_path,
            policy,
        })
        .await
    }

    pub async fn remove_selected(&self, ids: Vec<String>) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::RemoveSelected { ids }).await
    }

    pub async fn move_to_top(&self, ids: Vec<String>) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::MoveToTop { ids }).await
    }

    pub async fn move_to_bottom(&self, ids: Vec<String>) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::MoveToBottom { ids }).await
    }

    pub async fn start_queue(&self) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::StartQueue).await
    }

    pub async fn pause(&self) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::Resume).await
    }

    pub async fn stop_all(&self) -> Result<(), SchedulerError> {
        self.send(SchedulerCommand::StopAll).await
    }

    /// Shared snapshot, written only by the scheduler.
    pub fn snapshot(&self) -> SharedSnapshot {
        self.snapshot.clone()
    }

    /// Sender the auto-pause watcher publishes on.
    pub fn bridge_sender(&self) -> mpsc::Sender<BridgeEvent> {
        self.bridge_events.clone()
    }

    /// Queue revisions for the persistence task.
    pub fn queue_revisions(&self) -> watch::Receiver<Vec<QueuedJobRecord>> {
        self.queue_revisions.clone()
    }
}

/// Drives the queue: pulls jobs, runs the scan-then-encode handshake,
/// folds backend progress into the aggregator, and decides advance or
/// finish on completion.
pub struct QueueScheduler {
    queue: JobQueue,
    aggregator: ProgressAggregator,
    allocator: Arc<ResourceAllocator>,
    backend: Arc<dyn EncodeBackend>,
    bridge: Arc<AutoPauseBridge>,
    prompt: Arc<dyn PromptHandler>,
    actions: Arc<dyn SystemActions>,
    options: SchedulerOptions,

    state: RunState,
    active: Option<ActiveJob>,
    manual_paused: bool,
    auto_paused: bool,
    waiting_for_slot: bool,
    stop_deadline: Option<Instant>,

    completed_count: u64,
    failed_count: u64,
    results: Vec<EncodeResult>,

    snapshot: SharedSnapshot,
    queue_tx: watch::Sender<Vec<QueuedJobRecord>>,
    events_tx: mpsc::Sender<BackendEvent>,

    commands_rx: Option<mpsc::Receiver<SchedulerCommand>>,
    events_rx: Option<mpsc::Receiver<BackendEvent>>,
    bridge_rx: Option<mpsc::Receiver<BridgeEvent>>,
}

impl QueueScheduler {
    pub fn new(
        backend: Arc<dyn EncodeBackend>,
        allocator: Arc<ResourceAllocator>,
        bridge: Arc<AutoPauseBridge>,
        prompt: Arc<dyn PromptHandler>,
        actions: Arc<dyn SystemActions>,
        options: SchedulerOptions,
    ) -> (Self, SchedulerHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(256);
        let (bridge_tx, bridge_rx) = mpsc::channel(16);
        let (queue_tx, queue_rx) = watch::channel(Vec::new());
        let snapshot = new_shared_snapshot();

        let handle = SchedulerHandle {
            commands: commands_tx,
            snapshot: snapshot.clone(),
            bridge_events: bridge_tx,
            queue_revisions: queue_rx,
        };

        let scheduler = Self {
            queue: JobQueue::new(),
            aggregator: ProgressAggregator::new(),
            allocator,
            backend,
            bridge,
            prompt,
            actions,
            options,
            state: RunState::Idle,
            active: None,
            manual_paused: false,
            auto_paused: false,
            waiting_for_slot: false,
            stop_deadline: None,
            completed_count: 0,
            failed_count: 0,
            results: Vec::new(),
            snapshot,
            queue_tx,
            events_tx,
            commands_rx: Some(commands_rx),
            events_rx: Some(events_rx),
            bridge_rx: Some(bridge_rx),
        };

        (scheduler, handle)
    }

    /// Repopulate the queue from persisted records. Call before `run`.
    /// Restored jobs always re-scan: no backend session survives a
    /// process restart.
    pub fn restore(&mut self, records: Vec<QueuedJobRecord>) {
        for record in records {
            let mut job = record.job;
            job.needs_scan = true;
            self.queue.enqueue(job, record.manual_output_path);
        }
        info!(jobs = self.queue.len(), "queue restored from store");
    }

    /// Consume the scheduler, processing commands and events until every
    /// command sender is dropped.
    pub async fn run(mut self) {
        let mut commands = self.commands_rx.take().expect("run called twice");
        let mut events = self.events_rx.take().expect("run called twice");
        let mut bridge_events = self.bridge_rx.take().expect("run called twice");

        self.publish_snapshot().await;

        loop {
            let stop_deadline = self.stop_deadline;
            let waiting_for_slot = self.waiting_for_slot;

            tokio::select! {
                maybe_command = commands.recv() => match maybe_command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = events.recv() => self.handle_backend_event(event).await,
                Some(event) = bridge_events.recv() => self.handle_bridge_event(event).await,
                _ = wait_until(stop_deadline), if stop_deadline.is_some() => {
                    self.finalize_stop(true).await;
                }
                _ = tokio::time::sleep(SLOT_RETRY_INTERVAL), if waiting_for_slot => {
                    self.start_next_job().await;
                    self.publish_snapshot().await;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::Enqueue {
                job,
                manual_output_path,
                policy,
            } => self.enqueue(job, manual_output_path, policy).await,
            SchedulerCommand::RemoveSelected { ids } => self.remove_selected(&ids).await,
            SchedulerCommand::MoveToTop { ids } => {
                self.queue.move_to_top(&ids);
                self.publish_queue();
                self.publish_snapshot().await;
            }
            SchedulerCommand::MoveToBottom { ids } => {
                self.queue.move_to_bottom(&ids);
                self.publish_queue();
                self.publish_snapshot().await;
            }
            SchedulerCommand::StartQueue => self.start_queue().await,
            SchedulerCommand::Pause => self.pause(true).await,
            SchedulerCommand::Resume => self.resume_manual().await,
            SchedulerCommand::StopAll => self.stop_all().await,
        }
    }

    async fn enqueue(&mut self, mut job: EncodeJob, manual_output_path: bool, policy: ConflictPolicy) {
        let claimed: HashSet<PathBuf> = self
            .queue
            .iter()
            .map(|q| q.job.output_path.clone())
            .collect();

        match resolve_output_path(&job.output_path, &claimed, policy, self.prompt.as_ref()) {
            Some(resolved) => {
                job.output_path = resolved;
                let cost = job_cost(job.video_length_secs, job.two_pass, job.subtitle_scan);
                info!(job_id = %job.id, source = %job.source_path.display(), "job enqueued");
                self.queue.enqueue(job, manual_output_path);
                if self.state == RunState::Running {
                    self.aggregator.add_cost(cost);
                }
                self.publish_queue();
                self.publish_snapshot().await;
            }
            None => {
                info!(source = %job.source_path.display(), "enqueue cancelled by conflict resolution");
            }
        }
    }

    async fn remove_selected(&mut self, ids: &[String]) {
        let removed = self
            .queue
            .remove_matching(|q| ids.contains(&q.job.id));
        if removed.is_empty() {
            return;
        }
        if self.state == RunState::Running {
            for job in &removed {
                self.aggregator
                    .remove_cost(job_cost(job.video_length_secs, job.two_pass, job.subtitle_scan));
            }
        }
        info!(removed = removed.len(), "jobs removed from queue");
        self.publish_queue();
        self.publish_snapshot().await;
    }

    async fn start_queue(&mut self) {
        if self.state != RunState::Idle {
            warn!("start requested while queue is already running");
            return;
        }
        if self.queue.is_empty() {
            info!("start requested on an empty queue");
            return;
        }

        self.state = RunState::Running;
        self.manual_paused = false;
        self.auto_paused = false;
        self.aggregator.start_run(self.queue.total_cost());
        self.bridge.report_start();

        if self.queue.len() == 1 {
            if let Some(head) = self.queue.head_mut() {
                head.only_item = true;
            }
        }

        info!(
            jobs = self.queue.len(),
            total_cost = self.aggregator.total_queue_cost(),
            "queue started"
        );
        self.start_next_job().await;
        self.publish_snapshot().await;
    }

    /// Start the head job: acquire hardware slots, then scan or encode.
    /// A busy pool defers this job's start without blocking the actor.
    async fn start_next_job(&mut self) {
        if self.state != RunState::Running || self.active.is_some() {
            return;
        }
        let Some(head) = self.queue.head() else {
            self.finish_run();
            return;
        };
        let job = head.job.clone();

        if !self.allocator.try_acquire_all(&job.required_pools, &job.id) {
            if !self.waiting_for_slot {
                warn!(
                    job_id = %job.id,
                    pools = ?job.required_pools,
                    "hardware pool busy, deferring job start"
                );
            }
            self.waiting_for_slot = true;
            return;
        }
        self.waiting_for_slot = false;

        let mut clock = EncodeClock::default();
        clock.start();

        let mut active = ActiveJob {
            work: JobWork::for_job(&job),
            phase: ActivePhase::Scanning,
            held_pools: job.required_pools.clone(),
            encode_log_errors: 0,
            clock,
            job,
        };

        if let Some(head) = self.queue.head_mut() {
            head.encoding = true;
            head.percent_complete = 0.0;
        }

        if active.job.needs_scan {
            info!(job_id = %active.job.id, source = %active.job.source_path.display(), "scanning source");
            self.backend.start_scan(
                &active.job.id,
                &active.job.source_path,
                self.options.preview_count,
                Some(active.job.title),
                self.events_tx.clone(),
            );
        } else {
            active.phase = ActivePhase::Encoding;
            info!(job_id = %active.job.id, title = active.job.title, "starting encode");
            self.backend.start_encode(&active.job, self.events_tx.clone());
        }

        self.active = Some(active);
    }

    async fn handle_backend_event(&mut self, event: BackendEvent) {
        let Some(active_id) = self.active.as_ref().map(|a| a.job.id.clone()) else {
            debug!(job_id = event.job_id(), "backend event with no active job dropped");
            return;
        };

        if event.job_id() != active_id {
            // An event from a session that no longer owns the queue (a
            // stopped job, a stray scan). Log errors are recorded in the
            // log only; they are never attributed to the active job.
            if let BackendEvent::LogError { message, .. } = &event {
                warn!(job_id = event.job_id(), message = %message, "backend error for inactive job");
            }
            return;
        }

        if self.state == RunState::Stopping {
            // Only session teardown matters now
            match event {
                BackendEvent::Completed { .. } | BackendEvent::ScanCompleted { .. } => {
                    self.finalize_stop(false).await;
                }
                _ => {}
            }
            return;
        }

        match event {
            BackendEvent::ScanCompleted { titles, .. } => self.on_scan_completed(titles).await,
            BackendEvent::Progress {
                pass,
                fraction,
                current_fps,
                average_fps,
                eta_secs,
                ..
            } => {
                self.on_progress(pass, fraction, current_fps, average_fps, eta_secs)
                    .await
            }
            BackendEvent::LogError { phase, message, .. } => {
                if phase == LogPhase::Encode {
                    if let Some(active) = self.active.as_mut() {
                        active.encode_log_errors += 1;
                    }
                }
                error!(job_id = %active_id, ?phase, message = %message, "backend logged an error");
            }
            BackendEvent::Completed { backend_error, .. } => {
                self.on_completed(backend_error).await;
            }
        }
    }

    /// The scan-then-encode handshake: a found title starts the encode,
    /// a missing title fails the job without ever starting one.
    async fn on_scan_completed(&mut self, titles: Vec<TitleInfo>) {
        let (job, found) = {
            let Some(active) = self.active.as_mut() else { return };
            if active.phase != ActivePhase::Scanning {
                return;
            }
            let wanted = active.job.title;
            let found = titles.iter().find(|t| t.index == wanted).cloned();

            if let Some(title) = &found {
                // The enqueuing layer may not have known the length yet;
                // the scan is authoritative
                if active.job.video_length_secs <= 0.0 && title.duration_secs > 0.0 {
                    let old_cost = active.work.cost;
                    active.job.video_length_secs = title.duration_secs;
                    active.work = JobWork::for_job(&active.job);
                    let delta = active.work.cost - old_cost;
                    if delta > 0.0 {
                        self.aggregator.add_cost(delta);
                    }
                }
                active.phase = ActivePhase::Encoding;
            }
            (active.job.clone(), found)
        };

        match found {
            Some(_) => {
                if let Some(head) = self.queue.head_mut() {
                    head.job.video_length_secs = job.video_length_secs;
                }
                info!(job_id = %job.id, title = job.title, "scan confirmed title, starting encode");
                self.backend.start_encode(&job, self.events_tx.clone());
            }
            None => {
                warn!(
                    job_id = %job.id,
                    source = %job.source_path.display(),
                    title = job.title,
                    "scan found no matching title"
                );
                self.finalize_job(
                    EncodeStatus::Failed,
                    Some(format!("scan found no title {}", job.title)),
                )
                .await;
            }
        }
    }

    async fn on_progress(
        &mut self,
        pass: i32,
        fraction: f64,
        current_fps: f64,
        average_fps: f64,
        eta_secs: f64,
    ) {
        let (completed, percent) = {
            let Some(active) = self.active.as_mut() else { return };
            if active.phase != ActivePhase::Encoding {
                return;
            }
            let Some(pass) = EncodePass::from_raw(pass) else {
                warn!(pass, "progress event with unknown pass number dropped");
                return;
            };
            active.work.apply_progress(pass, fraction);
            (
                active.work.completed_work(),
                active.work.fraction_complete() * 100.0,
            )
        };

        if let Some(head) = self.queue.head_mut() {
            head.percent_complete = percent;
        }
        self.aggregator
            .record_progress(completed, current_fps, average_fps, eta_secs);
        self.publish_snapshot().await;
    }

    /// Decide the job's terminal status. Success needs all of: backend
    /// reported no error, nothing was logged to this job's encode-phase
    /// log, the output exists, and the output is non-empty. The backend
    /// is known to under-report certain failures, hence the extra checks.
    async fn on_completed(&mut self, backend_error: bool) {
        let (output_path, log_errors) = {
            let Some(active) = self.active.as_ref() else { return };
            (active.job.output_path.clone(), active.encode_log_errors)
        };

        let output_size = std::fs::metadata(&output_path).map(|m| m.len()).unwrap_or(0);

        let (status, reason) = if backend_error {
            (EncodeStatus::Failed, Some("backend reported an error".to_string()))
        } else if log_errors > 0 {
            (
                EncodeStatus::Failed,
                Some(format!("{} errors logged during encode", log_errors)),
            )
        } else if output_size == 0 {
            (
                EncodeStatus::Failed,
                Some("output file is missing or empty".to_string()),
            )
        } else {
            (EncodeStatus::Succeeded, None)
        };

        self.finalize_job(status, reason).await;
    }

    /// Record the result, release resources, and advance or finish.
    async fn finalize_job(&mut self, status: EncodeStatus, reason: Option<String>) {
        let Some(active) = self.active.take() else { return };

        self.allocator
            .release_all(&active.held_pools, &active.job.id);

        let size_bytes = std::fs::metadata(&active.job.output_path)
            .map(|m| m.len())
            .unwrap_or(0);

        let result = EncodeResult {
            job_id: active.job.id.clone(),
            destination: active.job.output_path.clone(),
            status,
            encode_secs: active.clock.elapsed_secs(),
            pause_secs: active.clock.paused_secs(),
            size_bytes,
            log_path: None,
            error_reason: reason.clone(),
        };

        match status {
            EncodeStatus::Succeeded => {
                self.completed_count += 1;
                info!(
                    job_id = %active.job.id,
                    destination = %active.job.output_path.display(),
                    encode_secs = result.encode_secs,
                    "job succeeded"
                );
            }
            EncodeStatus::Failed => {
                self.failed_count += 1;
                error!(
                    job_id = %active.job.id,
                    source = %active.job.source_path.display(),
                    title = active.job.title,
                    range = ?active.job.range,
                    reason = reason.as_deref().unwrap_or("unknown"),
                    "job failed"
                );
            }
        }

        self.results.push(result);
        self.aggregator.job_finished(active.work.cost);
        self.queue.pop_head();
        self.publish_queue();

        if self.queue.is_empty() {
            self.finish_run();
        } else {
            self.start_next_job().await;
        }
        self.publish_snapshot().await;
    }

    /// Natural end of a run: go idle and run the configured action.
    /// A failed job never gets here early; only an empty queue does.
    fn finish_run(&mut self) {
        if self.state == RunState::Idle {
            return;
        }
        self.state = RunState::Idle;
        self.manual_paused = false;
        self.auto_paused = false;
        self.waiting_for_slot = false;
        self.aggregator.finish_run();
        self.bridge.report_stop();
        info!(
            completed = self.completed_count,
            failed = self.failed_count,
            "queue complete"
        );

        match self.options.when_done {
            WhenDone::Nothing => {}
            WhenDone::Sleep => self.actions.sleep(),
            WhenDone::LogOff => self.actions.log_off(),
            WhenDone::Shutdown => self.actions.shutdown(),
        }
    }

    fn is_paused(&self) -> bool {
        self.manual_paused || self.auto_paused
    }

    /// Shared pause transition for manual and automatic pause. The two
    /// sources are tracked independently so auto-resume cannot override
    /// a manual pause.
    async fn pause(&mut self, manual: bool) {
        if self.state != RunState::Running {
            warn!(manual, "pause requested while not encoding");
            return;
        }
        let was_paused = self.is_paused();
        if manual {
            self.manual_paused = true;
        } else {
            self.auto_paused = true;
        }
        if !was_paused {
            if let Some(active) = self.active.as_mut() {
                active.clock.pause();
            }
            if let Some(id) = self.active.as_ref().map(|a| a.job.id.clone()) {
                self.backend.pause(&id);
            }
            self.aggregator.clock.pause();
            self.bridge.report_pause();
            info!(manual, "encoding paused");
        }
        self.publish_snapshot().await;
    }

    async fn resume_manual(&mut self) {
        if !self.is_paused() {
            warn!("resume requested while not paused");
            return;
        }
        // Manual resume clears both pause sources
        self.manual_paused = false;
        self.auto_paused = false;
        self.resume_backend().await;
    }

    async fn resume_auto(&mut self) {
        self.auto_paused = false;
        if self.manual_paused {
            // The user paused by hand; the bridge may not resume for them
            return;
        }
        self.resume_backend().await;
    }

    async fn resume_backend(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.clock.resume();
        }
        if let Some(id) = self.active.as_ref().map(|a| a.job.id.clone()) {
            self.backend.resume(&id);
        }
        self.aggregator.clock.resume();
        self.bridge.report_resume();
        info!("encoding resumed");
        self.publish_snapshot().await;
    }

    async fn handle_bridge_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::PauseEncoding => {
                if self.state == RunState::Running && !self.is_paused() {
                    self.pause(false).await;
                }
            }
            BridgeEvent::ResumeEncoding => {
                if self.auto_paused {
                    self.resume_auto().await;
                }
            }
        }
    }

    /// Manual stop. Idempotent: a second stop while stopping is a no-op.
    async fn stop_all(&mut self) {
        match self.state {
            RunState::Idle => {
                info!("stop requested while idle");
            }
            RunState::Stopping => {
                info!("stop already in progress");
            }
            RunState::Running => {
                self.state = RunState::Stopping;
                match self.active.as_ref().map(|a| a.job.id.clone()) {
                    Some(id) => {
                        info!(job_id = %id, "stopping queue, cancelling in-flight job");
                        self.backend.stop(&id);
                        self.stop_deadline = Some(Instant::now() + self.options.stop_timeout);
                        self.publish_snapshot().await;
                    }
                    None => {
                        self.finalize_stop(false).await;
                    }
                }
            }
        }
    }

    /// Tear down after a stop: always release held slots, even when the
    /// backend's acknowledgment never came (`forced`).
    async fn finalize_stop(&mut self, forced: bool) {
        self.stop_deadline = None;

        if let Some(active) = self.active.take() {
            if forced {
                warn!(
                    job_id = %active.job.id,
                    "backend stop acknowledgment timed out, forcing slot release"
                );
            }
            self.allocator
                .release_all(&active.held_pools, &active.job.id);

            // The cancelled job leaves the queue only when it was the
            // sole item; otherwise it stays at the head for a later run
            if self.queue.len() == 1 {
                self.queue.pop_head();
            } else if let Some(head) = self.queue.head_mut() {
                head.encoding = false;
                head.percent_complete = 0.0;
                head.only_item = false;
            }
        }

        self.state = RunState::Idle;
        self.manual_paused = false;
        self.auto_paused = false;
        self.waiting_for_slot = false;
        self.aggregator.finish_run();
        self.bridge.report_stop();
        self.publish_queue();
        self.publish_snapshot().await;
        info!("queue stopped");
    }

    fn publish_queue(&self) {
        let records: Vec<QueuedJobRecord> = self
            .queue
            .iter()
            .map(|q| QueuedJobRecord {
                job: q.job.clone(),
                manual_output_path: q.manual_output_path,
            })
            .collect();
        let _ = self.queue_tx.send(records);
    }

    fn build_snapshot(&self) -> QueueSnapshot {
        let paused = self.is_paused();
        let taskbar = match self.state {
            RunState::Idle => TaskbarState::None,
            _ if paused => TaskbarState::Paused,
            _ => TaskbarState::Normal,
        };

        let current_completed = self
            .active
            .as_ref()
            .map(|a| a.work.completed_work())
            .unwrap_or(0.0);
        let overall_fraction = self.aggregator.overall_fraction(current_completed);
        let eta_seconds = self.aggregator.eta_seconds().unwrap_or(0.0);
        let eta_display = if self.state == RunState::Running && self.aggregator.eta_seconds().is_some()
        {
            format_eta(eta_seconds)
        } else {
            String::new()
        };

        QueueSnapshot {
            overall_fraction,
            eta_seconds,
            eta_display,
            current_fps: self.aggregator.current_fps(),
            average_fps: self.aggregator.average_fps(),
            elapsed_secs: self.aggregator.clock.elapsed_secs(),
            paused,
            taskbar,
            queue_len: self.queue.len(),
            jobs: self
                .queue
                .iter()
                .map(|q| JobProgress {
                    id: q.job.id.clone(),
                    source_path: q.job.source_path.to_string_lossy().into_owned(),
                    percent_complete: q.percent_complete,
                    encoding: q.encoding,
                })
                .collect(),
            completed_count: self.completed_count,
            failed_count: self.failed_count,
            results: self.results.clone(),
        }
    }

    async fn publish_snapshot(&self) {
        let snapshot = self.build_snapshot();
        *self.snapshot.write().await = snapshot;
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
