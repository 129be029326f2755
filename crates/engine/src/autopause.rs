//! Auto-pause bridge.
//!
//! Watches for user-configured competing processes (a game, a capture
//! tool) and tells the scheduler to pause encoding while any of them
//! runs, resuming when they all exit. The scheduler reports its own
//! start/stop/pause/resume back so the bridge never fires while nothing
//! is encoding and never resumes over a manual pause.

use encodeq_config::AutoPauseConfig;
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::System;
use tokio::sync::mpsc;
use tracing::info;

/// Signals the bridge sends to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEvent {
    PauseEncoding,
    ResumeEncoding,
}

#[derive(Debug, Default)]
struct BridgeState {
    /// A queue run is active.
    encoding: bool,
    /// The user paused manually; the bridge stays quiet.
    manually_paused: bool,
    /// The bridge itself triggered the current pause.
    triggered: bool,
}

/// External-signal source the scheduler listens to for automatic
/// pause/resume around competing processes.
pub struct AutoPauseBridge {
    watched: Vec<String>,
    poll_interval: Duration,
    state: Mutex<BridgeState>,
}

impl AutoPauseBridge {
    pub fn new(config: &AutoPauseConfig) -> Self {
        Self {
            watched: config.processes.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            state: Mutex::new(BridgeState::default()),
        }
    }

    pub fn report_start(&self) {
        let mut state = self.state.lock().expect("bridge lock poisoned");
        state.encoding = true;
        state.manually_paused = false;
        state.triggered = false;
    }

    pub fn report_stop(&self) {
        let mut state = self.state.lock().expect("bridge lock poisoned");
        state.encoding = false;
        state.manually_paused = false;
        state.triggered = false;
    }

    pub fn report_pause(&self) {
        let mut state = self.state.lock().expect("bridge lock poisoned");
        // A pause the bridge did not cause is a manual one
        if !state.triggered {
            state.manually_paused = true;
        }
    }

    pub fn report_resume(&self) {
        let mut state = self.state.lock().expect("bridge lock poisoned");
        state.manually_paused = false;
        state.triggered = false;
    }

    /// Evaluate one poll of the process table. Returns the event to send,
    /// if any. Pure state transition, separated from the poll loop for
    /// testing.
    pub fn evaluate(&self, competing_process_running: bool) -> Option<BridgeEvent> {
        let mut state = self.state.lock().expect("bridge lock poisoned");

        if !state.encoding || state.manually_paused {
            return None;
        }

        if competing_process_running && !state.triggered {
            state.triggered = true;
            return Some(BridgeEvent::PauseEncoding);
        }
        if !competing_process_running && state.triggered {
            state.triggered = false;
            return Some(BridgeEvent::ResumeEncoding);
        }
        None
    }

    /// Whether any watched process name appears in the process table.
    fn competing_process_running(&self, sys: &System) -> bool {
        if self.watched.is_empty() {
            return false;
        }
        sys.processes().values().any(|process| {
            let name = process.name().to_string_lossy();
            self.watched
                .iter()
                .any(|watched| name.eq_ignore_ascii_case(watched))
        })
    }

    /// Run the watcher loop, publishing bridge events until the receiver
    /// side goes away.
    pub async fn run(self: std::sync::Arc<Self>, events: mpsc::Sender<BridgeEvent>) {
        if self.watched.is_empty() {
            return;
        }
        loop {
            let sys = System::new_all();
            let competing = self.competing_process_running(&sys);
            if let Some(event) = self.evaluate(competing) {
                info!(?event, "auto-pause bridge fired");
                if events.send(event).await.is_err() {
                    break;
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
