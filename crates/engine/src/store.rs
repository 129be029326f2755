//! Queue persistence.
//!
//! The scheduler publishes every queue revision on a watch channel; the
//! store task is the only place storage writes happen, so queue mutation
//! stays free of persistence side effects. The CLI loads the stored queue
//! once at startup to repopulate pending jobs.

use crate::job::EncodeJob;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Persisted form of one pending job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJobRecord {
    pub job: EncodeJob,
    /// Whether the user chose the output path by hand.
    pub manual_output_path: bool,
}

/// Collaborator that owns the storage format and location.
pub trait QueueStore: Send + Sync {
    fn save(&self, records: &[QueuedJobRecord]) -> Result<(), io::Error>;
    fn load(&self) -> Result<Vec<QueuedJobRecord>, io::Error>;
}

/// Stores the queue as one pretty-printed JSON file, written to a
/// temporary sibling and renamed so readers never see a torn file.
pub struct JsonQueueStore {
    path: PathBuf,
}

impl JsonQueueStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "queue.json".to_string());
        name.push_str(".tmp");
        self.path.with_file_name(name)
    }
}

impl QueueStore for JsonQueueStore {
    fn save(&self, records: &[QueuedJobRecord]) -> Result<(), io::Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(records)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let temp = self.temp_path();
        fs::write(&temp, json)?;
        fs::rename(&temp, &self.path)
    }

    fn load(&self) -> Result<Vec<QueuedJobRecord>, io::Error> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Create the queue-revision channel the scheduler publishes on.
pub fn queue_channel() -> (
    watch::Sender<Vec<QueuedJobRecord>>,
    watch::Receiver<Vec<QueuedJobRecord>>,
) {
    watch::channel(Vec::new())
}

/// Persist every queue revision until the scheduler side goes away.
pub async fn run_store_task(
    mut revisions: watch::Receiver<Vec<QueuedJobRecord>>,
    store: Arc<dyn QueueStore>,
) {
    while revisions.changed().await.is_ok() {
        let records = revisions.borrow_and_update().clone();
        match store.save(&records) {
            Ok(()) => debug!(jobs = records.len(), "queue persisted"),
            Err(e) => warn!(error = %e, "failed to persist queue"),
        }
    }
}

/// Load the stored queue, treating an unreadable store as empty so a
/// corrupt file cannot keep the application from starting.
pub fn load_or_empty(store: &dyn QueueStore, path_hint: &Path) -> Vec<QueuedJobRecord> {
    match store.load() {
        Ok(records) => records,
        Err(e) => {
            warn!(path = %path_hint.display(), error = %e, "failed to load stored queue, starting empty");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::SourceType;
    use tempfile::TempDir;

    fn make_record(name: &str) -> QueuedJobRecord {
        let mut job = EncodeJob::new(
            PathBuf::from(format!("/media/{}.mkv", name)),
            SourceType::File,
            1,
            "profile".to_string(),
            PathBuf::from(format!("/out/{}.mkv", name)),
        );
        job.video_length_secs = 3600.0;
        job.two_pass = true;
        QueuedJobRecord {
            job,
            manual_output_path: name.len() % 2 == 0,
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JsonQueueStore::new(dir.path().join("queue.json"));

        let records = vec![make_record("one"), make_record("two")];
        store.save(&records).expect("save should succeed");

        let loaded = store.load().expect("load should succeed");
        assert_eq!(loaded, records);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonQueueStore::new(dir.path().join("missing.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/state/queue.json");
        let store = JsonQueueStore::new(path.clone());

        store.save(&[make_record("one")]).expect("save should succeed");
        assert!(path.exists());
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonQueueStore::new(dir.path().join("queue.json"));

        store.save(&[make_record("one")]).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["queue.json"]);
    }

    #[test]
    fn test_load_or_empty_tolerates_corrupt_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(&path, "{ not json").unwrap();

        let store = JsonQueueStore::new(path.clone());
        assert!(load_or_empty(&store, &path).is_empty());
    }

    #[tokio::test]
    async fn test_store_task_persists_revisions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        let store: Arc<dyn QueueStore> = Arc::new(JsonQueueStore::new(path.clone()));

        let (tx, rx) = queue_channel();
        let task = tokio::spawn(run_store_task(rx, store.clone()));

        let records = vec![make_record("one")];
        tx.send(records.clone()).unwrap();

        // Give the task a moment to observe the revision
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if path.exists() {
                break;
            }
        }

        let loaded = store.load().unwrap();
        assert_eq!(loaded, records);

        drop(tx);
        task.await.unwrap();
    }
}
