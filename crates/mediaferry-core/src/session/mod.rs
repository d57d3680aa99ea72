//! Persisted state of a resumable multi-file job.
//!
//! The line-protocol transport records how many bytes of each file it has
//! streamed. If the process dies mid-batch, the next run finds the
//! incomplete [`SessionState`] and the companion client can continue each
//! file with `RESUME <index> <offset>`.
//!
//! ## Storage layout
//!
//! One JSON document holds the current job and a bounded log of past jobs
//! (newest first). Completed or superseded jobs move into the log; the
//! oldest entry is evicted past the cap.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::asset::TransferBatch;
use crate::error::Result;
use crate::persist;

/// Progress of one file within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProgress {
    /// Path identity of the asset
    #[serde(rename = "filePath")]
    pub path: String,
    /// Display name
    #[serde(rename = "fileName")]
    pub display_name: String,
    /// Size of the asset
    #[serde(rename = "fileSize")]
    pub total_bytes: u64,
    /// Bytes streamed so far (never above `total_bytes`)
    #[serde(rename = "transferredBytes")]
    pub transferred_bytes: u64,
    /// Whether the whole file was streamed
    #[serde(rename = "isCompleted")]
    pub completed: bool,
}

impl FileProgress {
    /// Bytes still to stream.
    pub const fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.transferred_bytes)
    }
}

/// Snapshot of an in-progress job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Unique identifier of the job
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
    /// One entry per batch index
    pub files: Vec<FileProgress>,
    /// When the job started
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Whether every file finished
    #[serde(rename = "isCompleted")]
    pub completed: bool,
}

impl SessionState {
    /// Fresh state for a batch, nothing transferred yet.
    pub fn from_batch(batch: &TransferBatch) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            files: batch
                .iter()
                .map(|asset| FileProgress {
                    path: asset.path.clone(),
                    display_name: asset.display_name.clone(),
                    total_bytes: asset.byte_size,
                    transferred_bytes: 0,
                    completed: false,
                })
                .collect(),
            created_at: Utc::now(),
            completed: false,
        }
    }

    /// Whether this state describes `batch` (same paths and sizes, same order).
    pub fn matches_batch(&self, batch: &TransferBatch) -> bool {
        self.files.len() == batch.len()
            && self
                .files
                .iter()
                .zip(batch.iter())
                .all(|(f, a)| f.path == a.path && f.total_bytes == a.byte_size)
    }

    /// Sum of all file sizes.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.total_bytes).sum()
    }

    /// Sum of bytes streamed.
    pub fn transferred_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.transferred_bytes).sum()
    }

    /// Fraction of all bytes streamed, `0.0` for an empty job.
    pub fn progress_fraction(&self) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            return 0.0;
        }
        self.transferred_bytes() as f64 / total as f64
    }

    /// Files not yet completed, with their batch index.
    pub fn incomplete_files(&self) -> Vec<(usize, &FileProgress)> {
        self.files
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.completed)
            .collect()
    }

    /// Whether every file is marked completed.
    pub fn is_all_files_completed(&self) -> bool {
        self.files.iter().all(|f| f.completed)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionDatabase {
    version: u32,
    current: Option<SessionState>,
    #[serde(default)]
    history: Vec<SessionState>,
}

/// Store for the current [`SessionState`] and the session log.
///
/// Every mutation is written through to disk.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    current: Option<SessionState>,
    history: Vec<SessionState>,
    max_sessions: usize,
}

impl SessionStore {
    /// Open the store at `path`, keeping at most `max_sessions` past jobs.
    ///
    /// A missing or corrupt file is logged and treated as an empty store.
    pub fn open(path: impl Into<PathBuf>, max_sessions: usize) -> Self {
        let path = path.into();
        let db = persist::read_json::<SessionDatabase>(&path)
            .unwrap_or_else(|e| {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Session state unreadable, starting empty"
                );
                None
            })
            .unwrap_or_default();

        let mut store = Self {
            path,
            current: db.current,
            history: db.history,
            max_sessions,
        };
        store.history.truncate(max_sessions);
        store
    }

    /// Replace the current job.
    ///
    /// A different job still occupying the slot moves into the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn save(&mut self, state: SessionState) -> Result<()> {
        if let Some(previous) = self.current.take() {
            if previous.session_id != state.session_id && !previous.completed {
                tracing::debug!(session_id = %previous.session_id, "Archiving superseded session");
                self.push_history(previous);
            }
        }
        tracing::debug!(
            session_id = %state.session_id,
            files = state.files.len(),
            "Saved session state"
        );
        self.current = Some(state);
        self.persist()
    }

    /// The current job, if any.
    pub fn load(&self) -> Option<&SessionState> {
        self.current.as_ref()
    }

    /// Record that `bytes` of file `index` have been streamed.
    ///
    /// Values above the file size are clamped. Unknown indices and files
    /// already completed are left alone, so a completed file always holds
    /// its full size.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn update_offset(&mut self, index: usize, bytes: u64) -> Result<()> {
        let Some(file) = self.file_mut(index).filter(|f| !f.completed) else {
            return Ok(());
        };
        file.transferred_bytes = bytes.min(file.total_bytes);
        self.persist()
    }

    /// Mark file `index` as fully streamed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn mark_file_completed(&mut self, index: usize) -> Result<()> {
        let Some(file) = self.file_mut(index) else {
            return Ok(());
        };
        file.transferred_bytes = file.total_bytes;
        file.completed = true;
        self.persist()
    }

    /// Mark the current job completed and append it to the session log.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn mark_session_completed(&mut self) -> Result<()> {
        let Some(current) = self.current.as_mut() else {
            return Ok(());
        };
        if current.completed {
            return Ok(());
        }
        current.completed = true;
        let finished = current.clone();

        tracing::info!(session_id = %finished.session_id, "Session completed");
        self.push_history(finished);
        self.persist()
    }

    /// Drop the current job. The session log is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn clear(&mut self) -> Result<()> {
        self.current = None;
        self.persist()
    }

    /// Whether a job exists that has not completed.
    pub fn has_incomplete(&self) -> bool {
        self.current.as_ref().is_some_and(|s| !s.completed)
    }

    /// Fraction of the current job's bytes streamed, `0.0` without a job.
    pub fn progress_fraction(&self) -> f64 {
        self.current
            .as_ref()
            .map_or(0.0, SessionState::progress_fraction)
    }

    /// Incomplete files of the current job.
    pub fn incomplete_files(&self) -> Vec<(usize, FileProgress)> {
        self.current.as_ref().map_or_else(Vec::new, |s| {
            s.incomplete_files()
                .into_iter()
                .map(|(i, f)| (i, f.clone()))
                .collect()
        })
    }

    /// Past jobs, newest first.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    /// Empty the session log.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be saved.
    pub fn clear_history(&mut self) -> Result<()> {
        self.history.clear();
        self.persist()
    }

    /// Location of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_mut(&mut self, index: usize) -> Option<&mut FileProgress> {
        self.current.as_mut().and_then(|s| s.files.get_mut(index))
    }

    fn push_history(&mut self, state: SessionState) {
        self.history.retain(|s| s.session_id != state.session_id);
        self.history.insert(0, state);
        self.history.truncate(self.max_sessions);
    }

    fn persist(&self) -> Result<()> {
        let db = SessionDatabase {
            version: 1,
            current: self.current.clone(),
            history: self.history.clone(),
        };
        persist::write_json_atomic(&self.path, &db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::TransferableAsset;
    use tempfile::TempDir;

    fn batch(sizes: &[u64]) -> TransferBatch {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| {
                TransferableAsset::new(
                    i as u64,
                    format!("/dcim/{i}.jpg"),
                    format!("{i}.jpg"),
                    size,
                    "image/jpeg",
                    0,
                )
            })
            .collect::<Vec<_>>()
            .into()
    }

    fn store(dir: &TempDir) -> SessionStore {
        SessionStore::open(dir.path().join("session.json"), 50)
    }

    #[test]
    fn test_progress_fraction_after_offset() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store
            .save(SessionState::from_batch(&batch(&[100, 200, 50])))
            .unwrap();

        store.update_offset(1, 150).unwrap();
        assert!((store.progress_fraction() - 150.0 / 350.0).abs() < f64::EPSILON);
        assert!(store.has_incomplete());

        for i in 0..3 {
            store.mark_file_completed(i).unwrap();
        }
        assert!((store.progress_fraction() - 1.0).abs() < f64::EPSILON);
        assert!(store.incomplete_files().is_empty());
        assert!(store.load().unwrap().is_all_files_completed());

        store.mark_session_completed().unwrap();
        assert!(!store.has_incomplete());
    }

    #[test]
    fn test_offset_is_clamped() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store
            .save(SessionState::from_batch(&batch(&[100])))
            .unwrap();

        store.update_offset(0, 1_000).unwrap();
        store.update_offset(5, 10).unwrap();
        assert_eq!(store.load().unwrap().files[0].transferred_bytes, 100);
    }

    #[test]
    fn test_completed_file_keeps_full_offset() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store
            .save(SessionState::from_batch(&batch(&[100, 50])))
            .unwrap();
        store.mark_file_completed(0).unwrap();

        store.update_offset(0, 0).unwrap();
        store.update_offset(0, 30).unwrap();

        let file = &store.load().unwrap().files[0];
        assert!(file.completed);
        assert_eq!(file.transferred_bytes, 100);
    }

    #[test]
    fn test_empty_job_fraction_is_zero() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        assert!(store.progress_fraction().abs() < f64::EPSILON);

        store.save(SessionState::from_batch(&batch(&[0, 0]))).unwrap();
        assert!(store.progress_fraction().abs() < f64::EPSILON);
    }

    #[test]
    fn test_incomplete_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let b = batch(&[10, 20]);
        {
            let mut store = store(&dir);
            store.save(SessionState::from_batch(&b)).unwrap();
            store.update_offset(0, 10).unwrap();
            store.mark_file_completed(0).unwrap();
            store.update_offset(1, 7).unwrap();
        }

        let store = store(&dir);
        assert!(store.has_incomplete());
        assert!(store.load().unwrap().matches_batch(&b));
        let incomplete = store.incomplete_files();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].0, 1);
        assert_eq!(incomplete[0].1.transferred_bytes, 7);
        assert_eq!(incomplete[0].1.remaining_bytes(), 13);
    }

    #[test]
    fn test_session_log_is_bounded() {
        let dir = TempDir::new().unwrap();
        let mut store = SessionStore::open(dir.path().join("session.json"), 3);

        let mut ids = Vec::new();
        for _ in 0..5 {
            let state = SessionState::from_batch(&batch(&[1]));
            ids.push(state.session_id);
            store.save(state).unwrap();
            store.mark_session_completed().unwrap();
        }

        let history = store.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].session_id, ids[4]);
        assert_eq!(history[2].session_id, ids[2]);
        assert!(history.iter().all(|s| s.completed));
    }

    #[test]
    fn test_superseded_session_is_archived() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let first = SessionState::from_batch(&batch(&[5]));
        let first_id = first.session_id;
        store.save(first).unwrap();
        store
            .save(SessionState::from_batch(&batch(&[6])))
            .unwrap();

        assert_eq!(store.history().len(), 1);
        assert_eq!(store.history()[0].session_id, first_id);
        assert!(!store.history()[0].completed);
    }

    #[test]
    fn test_matches_batch() {
        let state = SessionState::from_batch(&batch(&[1, 2]));
        assert!(state.matches_batch(&batch(&[1, 2])));
        assert!(!state.matches_batch(&batch(&[1, 3])));
        assert!(!state.matches_batch(&batch(&[1])));
    }

    #[test]
    fn test_persisted_field_names() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.save(SessionState::from_batch(&batch(&[1]))).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        for key in [
            "sessionId",
            "filePath",
            "fileName",
            "fileSize",
            "transferredBytes",
            "isCompleted",
            "timestamp",
        ] {
            assert!(raw.contains(key), "missing {key}");
        }
    }

    #[test]
    fn test_clear_keeps_log() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.save(SessionState::from_batch(&batch(&[1]))).unwrap();
        store.mark_session_completed().unwrap();
        store.clear().unwrap();

        assert!(store.load().is_none());
        assert_eq!(store.history().len(), 1);

        store.clear_history().unwrap();
        assert!(store.history().is_empty());
    }

    #[test]
    fn test_corrupt_file_yields_empty_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"[1, 2").unwrap();

        let store = SessionStore::open(&path, 50);
        assert!(store.load().is_none());
        assert!(!store.has_incomplete());
    }
}
