//! Startup checks.
//!
//! Preflight verification before the scheduler runs: the backend command
//! answers `--version`, the pool configuration is sane, and the state
//! file's directory can be created.

use encodeq_config::{Config, PoolConfig};
use std::collections::HashSet;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Encode backend not available: {0}")]
    BackendUnavailable(String),

    #[error("Invalid pool configuration: {0}")]
    InvalidPoolConfig(String),

    #[error("State directory not writable: {0}")]
    StateDirUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Check that the backend command runs and answers `--version`.
pub fn check_backend_available(command: &Path) -> Result<(), StartupError> {
    let output = Command::new(command).arg("--version").output().map_err(|e| {
        StartupError::BackendUnavailable(format!(
            "{} --version failed; is the backend installed and in PATH? Error: {}",
            command.display(),
            e
        ))
    })?;

    if !output.status.success() {
        return Err(StartupError::BackendUnavailable(format!(
            "{} --version exited with failure",
            command.display()
        )));
    }

    Ok(())
}

/// Validate pool definitions: names unique and non-empty, every slot
/// count at least one.
pub fn validate_pools(pools: &[PoolConfig]) -> Result<(), StartupError> {
    let mut seen = HashSet::new();
    for pool in pools {
        if pool.name.trim().is_empty() {
            return Err(StartupError::InvalidPoolConfig(
                "pool with empty name".to_string(),
            ));
        }
        if pool.slots == 0 {
            return Err(StartupError::InvalidPoolConfig(format!(
                "pool '{}' has zero slots; a pool that admits nothing deadlocks the queue",
                pool.name
            )));
        }
        if !seen.insert(pool.name.as_str()) {
            return Err(StartupError::InvalidPoolConfig(format!(
                "duplicate pool name '{}'",
                pool.name
            )));
        }
    }
    Ok(())
}

/// Ensure the directory holding the queue state file exists.
pub fn ensure_state_dir(state_file: &Path) -> Result<(), StartupError> {
    if let Some(parent) = state_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StartupError::StateDirUnavailable(format!("{}: {}", parent.display(), e))
            })?;
        }
    }
    Ok(())
}

/// Run all startup checks in order: pools, state dir, backend.
pub fn run_startup_checks(config: &Config) -> Result<(), StartupError> {
    validate_pools(&config.pools)?;
    ensure_state_dir(&config.queue.state_file)?;
    check_backend_available(&config.backend.command)?;
    Ok(())
}
