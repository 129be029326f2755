//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Policy applied when a job's output path collides with an existing file
/// or another queued job's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Ask the prompt collaborator what to do.
    Prompt,
    /// Keep the path and overwrite the existing file.
    Overwrite,
    /// Append a numeric suffix until the path is free.
    AutoRename,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::Prompt => write!(f, "prompt"),
            ConflictPolicy::Overwrite => write!(f, "overwrite"),
            ConflictPolicy::AutoRename => write!(f, "auto_rename"),
        }
    }
}

/// Action taken when the queue drains naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhenDone {
    /// Do nothing.
    Nothing,
    /// Put the machine to sleep.
    Sleep,
    /// Log the current user off.
    LogOff,
    /// Shut the machine down.
    Shutdown,
}

impl std::fmt::Display for WhenDone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WhenDone::Nothing => write!(f, "nothing"),
            WhenDone::Sleep => write!(f, "sleep"),
            WhenDone::LogOff => write!(f, "log_off"),
            WhenDone::Shutdown => write!(f, "shutdown"),
        }
    }
}

fn parse_when_done(s: &str) -> Option<WhenDone> {
    match s.to_lowercase().as_str() {
        "nothing" | "none" => Some(WhenDone::Nothing),
        "sleep" => Some(WhenDone::Sleep),
        "log_off" | "logoff" => Some(WhenDone::LogOff),
        "shutdown" => Some(WhenDone::Shutdown),
        _ => None,
    }
}

/// Queue-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Conflict policy for batch enqueue operations
    #[serde(default = "default_batch_conflict_policy")]
    pub batch_conflict_policy: ConflictPolicy,
    /// Conflict policy for single-job "encode now" operations
    #[serde(default = "default_encode_now_conflict_policy")]
    pub encode_now_conflict_policy: ConflictPolicy,
    /// Action to run when the queue finishes
    #[serde(default = "default_when_done")]
    pub when_done: WhenDone,
    /// File the pending queue is persisted to
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Preview count requested from backend scans
    #[serde(default = "default_preview_count")]
    pub preview_count: u32,
    /// Seconds to wait for the backend's stop acknowledgment before
    /// forcing slot release
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_batch_conflict_policy() -> ConflictPolicy {
    ConflictPolicy::AutoRename
}

fn default_encode_now_conflict_policy() -> ConflictPolicy {
    ConflictPolicy::Prompt
}

fn default_when_done() -> WhenDone {
    WhenDone::Nothing
}

fn default_state_file() -> PathBuf {
    PathBuf::from("queue.json")
}

fn default_preview_count() -> u32 {
    10
}

fn default_stop_timeout_secs() -> u64 {
    10
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_conflict_policy: default_batch_conflict_policy(),
            encode_now_conflict_policy: default_encode_now_conflict_policy(),
            when_done: default_when_done(),
            state_file: default_state_file(),
            preview_count: default_preview_count(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

/// One named hardware pool with a fixed slot count
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Pool name (e.g. "qsv", "nvenc")
    pub name: String,
    /// Fixed number of concurrent sessions the hardware supports
    pub slots: u32,
}

/// Auto-pause watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoPauseConfig {
    /// Process names that should pause encoding while running
    #[serde(default)]
    pub processes: Vec<String>,
    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

impl Default for AutoPauseConfig {
    fn default() -> Self {
        Self {
            processes: Vec::new(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Encode backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// Backend command to run (HandBrakeCLI-compatible)
    #[serde(default = "default_backend_command")]
    pub command: PathBuf,
}

fn default_backend_command() -> PathBuf {
    PathBuf::from("HandBrakeCLI")
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: default_backend_command(),
        }
    }
}

/// Status endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusConfig {
    /// Port the status server binds on 127.0.0.1
    #[serde(default = "default_status_port")]
    pub port: u16,
}

fn default_status_port() -> u16 {
    7890
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            port: default_status_port(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
    #[serde(default)]
    pub auto_pause: AutoPauseConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - ENCODEQ_BACKEND_COMMAND -> backend.command
    /// - ENCODEQ_STATE_FILE -> queue.state_file
    /// - ENCODEQ_STATUS_PORT -> status.port
    /// - ENCODEQ_WHEN_DONE -> queue.when_done
    pub fn apply_env_overrides(&mut self) {
        // ENCODEQ_BACKEND_COMMAND
        if let Ok(val) = env::var("ENCODEQ_BACKEND_COMMAND") {
            if !val.is_empty() {
                self.backend.command = PathBuf::from(val);
            }
        }

        // ENCODEQ_STATE_FILE
        if let Ok(val) = env::var("ENCODEQ_STATE_FILE") {
            if !val.is_empty() {
                self.queue.state_file = PathBuf::from(val);
            }
        }

        // ENCODEQ_STATUS_PORT
        if let Ok(val) = env::var("ENCODEQ_STATUS_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.status.port = port;
            }
        }

        // ENCODEQ_WHEN_DONE
        if let Ok(val) = env::var("ENCODEQ_WHEN_DONE") {
            if let Some(action) = parse_when_done(&val) {
                self.queue.when_done = action;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("ENCODEQ_BACKEND_COMMAND");
        env::remove_var("ENCODEQ_STATE_FILE");
        env::remove_var("ENCODEQ_STATUS_PORT");
        env::remove_var("ENCODEQ_WHEN_DONE");
    }

    fn policy_toml(policy: ConflictPolicy) -> &'static str {
        match policy {
            ConflictPolicy::Prompt => "prompt",
            ConflictPolicy::Overwrite => "overwrite",
            ConflictPolicy::AutoRename => "auto_rename",
        }
    }

    fn policy_strategy() -> impl Strategy<Value = ConflictPolicy> {
        prop_oneof![
            Just(ConflictPolicy::Prompt),
            Just(ConflictPolicy::Overwrite),
            Just(ConflictPolicy::AutoRename),
        ]
    }

    // Property: every combination of queue section values written as TOML
    // parses back to the same configuration.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_queue_section(
            batch_policy in policy_strategy(),
            encode_now_policy in policy_strategy(),
            preview_count in 1u32..60,
            stop_timeout in 1u64..120,
        ) {
            let toml_str = format!(
                r#"
[queue]
batch_conflict_policy = "{}"
encode_now_conflict_policy = "{}"
preview_count = {}
stop_timeout_secs = {}
"#,
                policy_toml(batch_policy),
                policy_toml(encode_now_policy),
                preview_count,
                stop_timeout
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.queue.batch_conflict_policy, batch_policy);
            prop_assert_eq!(config.queue.encode_now_conflict_policy, encode_now_policy);
            prop_assert_eq!(config.queue.preview_count, preview_count);
            prop_assert_eq!(config.queue.stop_timeout_secs, stop_timeout);
        }

        #[test]
        fn prop_config_parses_pool_entries(
            name in "[a-z][a-z0-9_]{0,15}",
            slots in 1u32..8,
        ) {
            let toml_str = format!(
                r#"
[[pools]]
name = "{}"
slots = {}
"#,
                name, slots
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.pools.len(), 1);
            prop_assert_eq!(&config.pools[0].name, &name);
            prop_assert_eq!(config.pools[0].slots, slots);
        }

        #[test]
        fn prop_env_overrides_status_port(
            initial_port in 1024u16..9000,
            override_port in 1024u16..9000,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[status]
port = {}
"#,
                initial_port
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("ENCODEQ_STATUS_PORT", override_port.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.status.port, override_port);
        }

        #[test]
        fn prop_env_overrides_backend_command(
            override_command in "[a-zA-Z0-9/_.-]{1,40}",
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = Config::parse_toml("").expect("Empty TOML");

            env::set_var("ENCODEQ_BACKEND_COMMAND", &override_command);
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.backend.command, PathBuf::from(override_command));
        }
    }

    // Test that missing sections use defaults
    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(
            config.queue.batch_conflict_policy,
            ConflictPolicy::AutoRename
        );
        assert_eq!(
            config.queue.encode_now_conflict_policy,
            ConflictPolicy::Prompt
        );
        assert_eq!(config.queue.when_done, WhenDone::Nothing);
        assert_eq!(config.queue.state_file, PathBuf::from("queue.json"));
        assert_eq!(config.queue.preview_count, 10);
        assert_eq!(config.queue.stop_timeout_secs, 10);
        assert!(config.pools.is_empty());
        assert!(config.auto_pause.processes.is_empty());
        assert_eq!(config.auto_pause.poll_interval_ms, 2000);
        assert_eq!(config.backend.command, PathBuf::from("HandBrakeCLI"));
        assert_eq!(config.status.port, 7890);
    }

    // Test partial config with some sections missing
    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[queue]
when_done = "shutdown"

[[pools]]
name = "qsv"
slots = 2

[auto_pause]
processes = ["game.exe", "obs"]
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(config.queue.when_done, WhenDone::Shutdown);
        assert_eq!(config.queue.preview_count, 10); // default
        assert_eq!(config.pools.len(), 1);
        assert_eq!(config.pools[0].name, "qsv");
        assert_eq!(config.pools[0].slots, 2);
        assert_eq!(config.auto_pause.processes, vec!["game.exe", "obs"]);
        assert_eq!(config.auto_pause.poll_interval_ms, 2000); // default
        assert_eq!(config.backend.command, PathBuf::from("HandBrakeCLI")); // default
    }

    #[test]
    fn test_when_done_env_override_accepts_aliases() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::parse_toml("").expect("Empty TOML");

        env::set_var("ENCODEQ_WHEN_DONE", "logoff");
        config.apply_env_overrides();
        assert_eq!(config.queue.when_done, WhenDone::LogOff);

        env::set_var("ENCODEQ_WHEN_DONE", "not-a-real-action");
        config.apply_env_overrides();
        // Invalid value keeps the existing setting
        assert_eq!(config.queue.when_done, WhenDone::LogOff);

        clear_env_vars();
    }

    #[test]
    fn test_conflict_policy_display() {
        assert_eq!(format!("{}", ConflictPolicy::Prompt), "prompt");
        assert_eq!(format!("{}", ConflictPolicy::Overwrite), "overwrite");
        assert_eq!(format!("{}", ConflictPolicy::AutoRename), "auto_rename");
    }

    #[test]
    fn test_when_done_display() {
        assert_eq!(format!("{}", WhenDone::Nothing), "nothing");
        assert_eq!(format!("{}", WhenDone::Sleep), "sleep");
        assert_eq!(format!("{}", WhenDone::LogOff), "log_off");
        assert_eq!(format!("{}", WhenDone::Shutdown), "shutdown");
    }
}
