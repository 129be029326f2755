//! Queue-wide progress aggregation.
//!
//! Combines per-job completed work into an overall fraction and ETA for
//! the whole run. The scheduler recomputes the shared snapshot inside its
//! serialization point; observers only ever read it.

use crate::job::EncodeResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// ETA is recomputed on every Nth progress update to avoid jitter.
pub const ETA_DECIMATION: u64 = 5;

/// Elapsed-time clock that excludes paused intervals.
#[derive(Debug, Default)]
pub struct EncodeClock {
    started: Option<Instant>,
    paused_since: Option<Instant>,
    paused_total: Duration,
}

impl EncodeClock {
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
        self.paused_since = None;
        self.paused_total = Duration::ZERO;
    }

    pub fn pause(&mut self) {
        if self.started.is_some() && self.paused_since.is_none() {
            self.paused_since = Some(Instant::now());
        }
    }

    pub fn resume(&mut self) {
        if let Some(since) = self.paused_since.take() {
            self.paused_total += since.elapsed();
        }
    }

    pub fn stop(&mut self) {
        self.resume();
        self.started = None;
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Seconds since start, excluding paused time.
    pub fn elapsed_secs(&self) -> f64 {
        match self.started {
            Some(started) => {
                let raw = started.elapsed();
                let paused = match self.paused_since {
                    Some(since) => self.paused_total + since.elapsed(),
                    None => self.paused_total,
                };
                raw.saturating_sub(paused).as_secs_f64()
            }
            None => 0.0,
        }
    }

    /// Seconds spent paused so far.
    pub fn paused_secs(&self) -> f64 {
        let paused = match self.paused_since {
            Some(since) => self.paused_total + since.elapsed(),
            None => self.paused_total,
        };
        paused.as_secs_f64()
    }
}

/// Taskbar progress indication derived from queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskbarState {
    Normal,
    Paused,
    None,
}

/// Per-job progress line for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub id: String,
    pub source_path: String,
    pub percent_complete: f64,
    pub encoding: bool,
}

/// Complete queue snapshot exposed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub overall_fraction: f64,
    pub eta_seconds: f64,
    pub eta_display: String,
    pub current_fps: f64,
    pub average_fps: f64,
    pub elapsed_secs: f64,
    pub paused: bool,
    pub taskbar: TaskbarState,
    pub queue_len: usize,
    pub jobs: Vec<JobProgress>,
    pub completed_count: u64,
    pub failed_count: u64,
    pub results: Vec<EncodeResult>,
}

impl Default for QueueSnapshot {
    fn default() -> Self {
        Self {
            overall_fraction: 0.0,
            eta_seconds: 0.0,
            eta_display: String::new(),
            current_fps: 0.0,
            average_fps: 0.0,
            elapsed_secs: 0.0,
            paused: false,
            taskbar: TaskbarState::None,
            queue_len: 0,
            jobs: Vec::new(),
            completed_count: 0,
            failed_count: 0,
            results: Vec::new(),
        }
    }
}

/// Shared snapshot state, written only by the scheduler.
pub type SharedSnapshot = Arc<RwLock<QueueSnapshot>>;

/// Creates a new SharedSnapshot instance with default values.
pub fn new_shared_snapshot() -> SharedSnapshot {
    Arc::new(RwLock::new(QueueSnapshot::default()))
}

/// Format whole seconds as `h:mm:ss`.
pub fn format_eta(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{}:{:02}:{:02}", hours, minutes, seconds)
}

/// Aggregates completed work across the whole queue run.
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    total_queue_cost: f64,
    completed_queue_work: f64,
    update_count: u64,
    last_eta_secs: Option<f64>,
    current_fps: f64,
    average_fps: f64,
    pub clock: EncodeClock,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a run: the total cost is fixed now (mid-run enqueues add to
    /// it later) and the elapsed clock starts.
    pub fn start_run(&mut self, total_queue_cost: f64) {
        self.total_queue_cost = total_queue_cost;
        self.completed_queue_work = 0.0;
        self.update_count = 0;
        self.last_eta_secs = None;
        self.current_fps = 0.0;
        self.average_fps = 0.0;
        self.clock.start();
    }

    pub fn finish_run(&mut self) {
        self.clock.stop();
    }

    pub fn total_queue_cost(&self) -> f64 {
        self.total_queue_cost
    }

    pub fn completed_queue_work(&self) -> f64 {
        self.completed_queue_work
    }

    /// A job enqueued mid-run grows the total. Observers must tolerate
    /// the bounded overall-fraction regression this causes.
    pub fn add_cost(&mut self, cost: f64) {
        self.total_queue_cost += cost;
    }

    /// A pending job removed mid-run shrinks the total.
    pub fn remove_cost(&mut self, cost: f64) {
        self.total_queue_cost = (self.total_queue_cost - cost).max(self.completed_queue_work);
    }

    /// A job finished (any terminal status): its full cost is banked.
    pub fn job_finished(&mut self, cost: f64) {
        self.completed_queue_work += cost;
    }

    /// Overall fraction complete given the active job's completed work.
    pub fn overall_fraction(&self, current_job_completed: f64) -> f64 {
        if self.total_queue_cost <= 0.0 {
            return 0.0;
        }
        ((self.completed_queue_work + current_job_completed) / self.total_queue_cost)
            .clamp(0.0, 1.0)
    }

    /// Record one backend progress update and return the overall fraction.
    ///
    /// FPS figures are taken only when the backend reports a non-negative
    /// estimated-time-left, the signal that it has warmed up enough for
    /// its numbers to be trusted.
    pub fn record_progress(
        &mut self,
        current_job_completed: f64,
        current_fps: f64,
        average_fps: f64,
        backend_eta_secs: f64,
    ) -> f64 {
        if backend_eta_secs >= 0.0 {
            self.current_fps = current_fps;
            self.average_fps = average_fps;
        }

        let fraction = self.overall_fraction(current_job_completed);

        if self.update_count % ETA_DECIMATION == 0 {
            self.refresh_eta(fraction);
        }
        self.update_count += 1;

        fraction
    }

    fn refresh_eta(&mut self, fraction: f64) {
        if fraction >= 1.0 {
            self.last_eta_secs = Some(0.0);
            return;
        }
        let elapsed = self.clock.elapsed_secs();
        if fraction <= f64::EPSILON || elapsed <= f64::EPSILON {
            return;
        }
        let remaining = (1.0 - fraction) * elapsed / fraction;
        if remaining.is_finite() {
            self.last_eta_secs = Some(remaining);
        }
    }

    pub fn eta_seconds(&self) -> Option<f64> {
        self.last_eta_secs
    }

    pub fn current_fps(&self) -> f64 {
        self.current_fps
    }

    pub fn average_fps(&self) -> f64 {
        self.average_fps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_two_job_scenario() {
        // Jobs of 1000s and 500s, single pass, no scan
        let mut agg = ProgressAggregator::new();
        agg.start_run(1500.0);

        // Job 1 fully completes
        agg.job_finished(1000.0);

        // Job 2 reports pass-1 fraction 0.5 -> 250 completed
        let fraction = agg.record_progress(250.0, 0.0, 0.0, -1.0);
        assert!((fraction - (1250.0 / 1500.0)).abs() < 1e-9);
        assert!((fraction - 0.8333333333).abs() < 1e-6);
    }

    #[test]
    fn test_fraction_guarded_when_total_zero() {
        let agg = ProgressAggregator::new();
        assert_eq!(agg.overall_fraction(0.0), 0.0);
        assert_eq!(agg.overall_fraction(100.0), 0.0);
    }

    #[test]
    fn test_fps_passthrough_requires_warmup() {
        let mut agg = ProgressAggregator::new();
        agg.start_run(1000.0);

        // Negative ETA: backend not warmed up, fps ignored
        agg.record_progress(10.0, 24.0, 23.0, -1.0);
        assert_eq!(agg.current_fps(), 0.0);
        assert_eq!(agg.average_fps(), 0.0);

        // Non-negative ETA: fps taken
        agg.record_progress(20.0, 24.0, 23.0, 120.0);
        assert!((agg.current_fps() - 24.0).abs() < 1e-9);
        assert!((agg.average_fps() - 23.0).abs() < 1e-9);
    }

    #[test]
    fn test_eta_decimation() {
        let mut agg = ProgressAggregator::new();
        agg.start_run(1000.0);
        std::thread::sleep(Duration::from_millis(20));

        // First update computes an ETA
        agg.record_progress(500.0, 0.0, 0.0, -1.0);
        let first = agg.eta_seconds();
        assert!(first.is_some());

        // Updates 2..=5 reuse the sampled value
        for completed in [600.0, 700.0, 800.0, 900.0] {
            agg.record_progress(completed, 0.0, 0.0, -1.0);
            assert_eq!(agg.eta_seconds(), first);
        }

        // Sixth update resamples
        std::thread::sleep(Duration::from_millis(20));
        agg.record_progress(990.0, 0.0, 0.0, -1.0);
        assert_ne!(agg.eta_seconds(), first);
    }

    #[test]
    fn test_eta_zero_at_completion() {
        let mut agg = ProgressAggregator::new();
        agg.start_run(1000.0);
        agg.job_finished(1000.0);
        agg.record_progress(0.0, 0.0, 0.0, -1.0);
        assert_eq!(agg.eta_seconds(), Some(0.0));
    }

    #[test]
    fn test_eta_guard_at_zero_fraction() {
        let mut agg = ProgressAggregator::new();
        agg.start_run(1000.0);
        agg.record_progress(0.0, 0.0, 0.0, -1.0);
        // No progress yet: no ETA rather than a division blowup
        assert_eq!(agg.eta_seconds(), None);
    }

    #[test]
    fn test_clock_excludes_paused_time() {
        let mut clock = EncodeClock::default();
        clock.start();
        std::thread::sleep(Duration::from_millis(30));

        clock.pause();
        let at_pause = clock.elapsed_secs();
        std::thread::sleep(Duration::from_millis(50));
        // Elapsed does not advance while paused
        assert!((clock.elapsed_secs() - at_pause).abs() < 0.02);
        assert!(clock.paused_secs() >= 0.04);

        clock.resume();
        std::thread::sleep(Duration::from_millis(20));
        assert!(clock.elapsed_secs() > at_pause);
    }

    #[test]
    fn test_clock_pause_idempotent() {
        let mut clock = EncodeClock::default();
        clock.start();
        clock.pause();
        clock.pause();
        clock.resume();
        clock.resume();
        assert!(clock.is_running());
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(0.0), "0:00:00");
        assert_eq!(format_eta(59.4), "0:00:59");
        assert_eq!(format_eta(3661.0), "1:01:01");
        assert_eq!(format_eta(-5.0), "0:00:00");
    }

    // Property: over any sequence of progress values and finished jobs
    // drawn against a fixed total, the overall fraction is non-decreasing.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_overall_fraction_monotone(
            job_costs in proptest::collection::vec(1.0f64..5000.0, 1..6),
            steps in proptest::collection::vec(0.0f64..1.0, 1..40),
        ) {
            let total: f64 = job_costs.iter().sum();
            let mut agg = ProgressAggregator::new();
            agg.start_run(total);

            let mut last_fraction = 0.0f64;
            let mut job_index = 0usize;
            let mut per_job_floor = 0.0f64;

            for step in steps {
                if job_index >= job_costs.len() {
                    break;
                }
                let cost = job_costs[job_index];
                // Within a job, completed work only moves forward
                per_job_floor = per_job_floor.max(step * cost);
                let fraction = agg.record_progress(per_job_floor, 0.0, 0.0, -1.0);
                prop_assert!(fraction >= last_fraction - 1e-12,
                    "fraction regressed: {} -> {}", last_fraction, fraction);
                last_fraction = fraction;

                // Occasionally finish the job and move on
                if per_job_floor >= cost * 0.9 {
                    agg.job_finished(cost);
                    job_index += 1;
                    per_job_floor = 0.0;
                    let fraction = agg.overall_fraction(0.0);
                    prop_assert!(fraction >= last_fraction - 1e-12);
                    last_fraction = fraction;
                }
            }
        }
    }
}
