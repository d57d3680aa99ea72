//! Progress, throughput and ETA tracking.
//!
//! [`ProgressTracker`] is a pure aggregator: it turns byte-count updates
//! into a [`ProgressSnapshot`] and knows nothing about transports.
//! [`ProgressHub`] serializes updates from concurrent connection tasks
//! and publishes each new snapshot on a `watch` channel for the
//! presentation layer.
//!
//! ## Accumulation
//!
//! Each file keeps a high-water mark of its transferred bytes; the overall
//! total is the sum of those marks. Repeated updates for the same file,
//! or the same file requested twice, never double count, and
//! `overall_fraction` only moves forward within a session.
//!
//! Finished files are counted per batch index. Serving a file twice counts
//! it once, and a later success replaces an earlier failure.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Default throughput sampling window.
pub const DEFAULT_THROUGHPUT_WINDOW: Duration = Duration::from_secs(1);

/// Point-in-time view of a session's progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Whether a transfer is running
    pub is_active: bool,
    /// Files in the batch
    pub total_files: usize,
    /// Files streamed successfully
    pub completed_files: usize,
    /// Files that failed
    pub failed_files: usize,
    /// Batch index of the most recently updated file
    pub current_file_index: Option<usize>,
    /// Name of the most recently updated file
    pub current_file_name: String,
    /// Fraction of the current file transferred
    pub current_file_fraction: f64,
    /// Fraction of all bytes transferred
    pub overall_fraction: f64,
    /// Bytes transferred across all files
    pub transferred_bytes: u64,
    /// Bytes in the batch
    pub total_bytes: u64,
    /// Last sampled throughput
    pub throughput_bytes_per_sec: u64,
    /// Estimated seconds remaining, `None` while throughput is unknown
    pub eta_seconds: Option<u64>,
}

impl ProgressSnapshot {
    /// Throughput in MiB/s for display.
    pub fn throughput_mib_per_sec(&self) -> f64 {
        self.throughput_bytes_per_sec as f64 / (1024.0 * 1024.0)
    }

    /// Overall progress as a percentage (0.0 - 100.0).
    pub fn percentage(&self) -> f64 {
        self.overall_fraction * 100.0
    }

    /// Whether every file has either completed or failed.
    pub fn all_files_done(&self) -> bool {
        self.total_files > 0 && self.completed_files + self.failed_files >= self.total_files
    }
}

/// Aggregates byte-level updates into a [`ProgressSnapshot`].
#[derive(Debug)]
pub struct ProgressTracker {
    snapshot: ProgressSnapshot,
    per_file: HashMap<usize, u64>,
    completed: HashSet<usize>,
    failed: HashSet<usize>,
    window: Duration,
    window_start: Instant,
    window_bytes: u64,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_THROUGHPUT_WINDOW)
    }
}

impl ProgressTracker {
    /// Create an idle tracker that samples throughput every `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            snapshot: ProgressSnapshot::default(),
            per_file: HashMap::new(),
            completed: HashSet::new(),
            failed: HashSet::new(),
            window,
            window_start: Instant::now(),
            window_bytes: 0,
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> &ProgressSnapshot {
        &self.snapshot
    }

    /// Reset counters and timer for a new batch.
    pub fn start(&mut self, total_files: usize, total_bytes: u64) {
        self.start_at(total_files, total_bytes, Instant::now());
    }

    /// [`start`](Self::start) with an explicit clock reading.
    pub fn start_at(&mut self, total_files: usize, total_bytes: u64, now: Instant) {
        self.clear_files();
        self.snapshot = ProgressSnapshot {
            is_active: true,
            total_files,
            total_bytes,
            ..ProgressSnapshot::default()
        };
        self.window_start = now;
        self.window_bytes = 0;
    }

    /// Report that `transferred` of `total` bytes of file `index` have moved.
    pub fn update_file(&mut self, index: usize, name: &str, transferred: u64, total: u64) {
        self.update_file_at(index, name, transferred, total, Instant::now());
    }

    /// [`update_file`](Self::update_file) with an explicit clock reading.
    pub fn update_file_at(
        &mut self,
        index: usize,
        name: &str,
        transferred: u64,
        total: u64,
        now: Instant,
    ) {
        self.raise_mark(index, name, transferred, total);
        self.sample_throughput(now);
        self.refresh_eta();
    }

    /// Report a file resuming at `offset`.
    ///
    /// The bytes below `offset` count toward the overall fraction but not
    /// toward throughput, since they moved in an earlier connection.
    pub fn resume_file(&mut self, index: usize, name: &str, offset: u64, total: u64) {
        let before = self.snapshot.transferred_bytes;
        self.raise_mark(index, name, offset, total);
        self.window_bytes += self.snapshot.transferred_bytes - before;
        self.refresh_eta();
    }

    /// Record file `index` as finished.
    ///
    /// A failure never overrides an earlier success of the same file.
    pub fn complete_file(&mut self, index: usize, success: bool) {
        if success {
            self.failed.remove(&index);
            self.completed.insert(index);
        } else if !self.completed.contains(&index) {
            self.failed.insert(index);
        }
        self.snapshot.completed_files = self.completed.len();
        self.snapshot.failed_files = self.failed.len();
    }

    /// Whether file `index` has been sent successfully.
    pub fn is_file_completed(&self, index: usize) -> bool {
        self.completed.contains(&index)
    }

    /// Mark the batch finished.
    pub fn finish(&mut self) {
        self.snapshot.is_active = false;
        self.snapshot.overall_fraction = 1.0;
        self.snapshot.eta_seconds = (self.snapshot.throughput_bytes_per_sec > 0).then_some(0);
    }

    /// Return to the idle zero state.
    pub fn reset(&mut self) {
        self.clear_files();
        self.snapshot = ProgressSnapshot::default();
        self.window_bytes = 0;
    }

    /// Abandon the batch. Same as [`reset`](Self::reset).
    pub fn cancel(&mut self) {
        self.reset();
    }

    fn clear_files(&mut self) {
        self.per_file.clear();
        self.completed.clear();
        self.failed.clear();
    }

    fn raise_mark(&mut self, index: usize, name: &str, transferred: u64, total: u64) {
        let transferred = if total > 0 {
            transferred.min(total)
        } else {
            transferred
        };

        let mark = self.per_file.entry(index).or_insert(0);
        if transferred > *mark {
            self.snapshot.transferred_bytes += transferred - *mark;
            *mark = transferred;
        }

        let snapshot = &mut self.snapshot;
        if snapshot.current_file_index != Some(index) {
            snapshot.current_file_index = Some(index);
            name.clone_into(&mut snapshot.current_file_name);
        }
        snapshot.current_file_fraction = if total == 0 {
            0.0
        } else {
            transferred as f64 / total as f64
        };
        if snapshot.total_bytes > 0 {
            let fraction =
                (snapshot.transferred_bytes as f64 / snapshot.total_bytes as f64).min(1.0);
            snapshot.overall_fraction = snapshot.overall_fraction.max(fraction);
        }
    }

    fn sample_throughput(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window || elapsed.is_zero() {
            return;
        }
        let moved = self
            .snapshot
            .transferred_bytes
            .saturating_sub(self.window_bytes);
        self.snapshot.throughput_bytes_per_sec = (moved as f64 / elapsed.as_secs_f64()) as u64;
        self.window_start = now;
        self.window_bytes = self.snapshot.transferred_bytes;
    }

    fn refresh_eta(&mut self) {
        let snapshot = &mut self.snapshot;
        let throughput = snapshot.throughput_bytes_per_sec;
        snapshot.eta_seconds = (throughput > 0).then(|| {
            snapshot
                .total_bytes
                .saturating_sub(snapshot.transferred_bytes)
                .div_ceil(throughput)
        });
    }
}

/// Shared, observable wrapper around a [`ProgressTracker`].
///
/// Clones share the same tracker. Every mutation publishes a fresh
/// snapshot to all subscribers.
#[derive(Debug, Clone)]
pub struct ProgressHub {
    tracker: Arc<Mutex<ProgressTracker>>,
    tx: Arc<watch::Sender<ProgressSnapshot>>,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(DEFAULT_THROUGHPUT_WINDOW)
    }
}

impl ProgressHub {
    /// Create a hub with the given throughput window.
    pub fn new(window: Duration) -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self {
            tracker: Arc::new(Mutex::new(ProgressTracker::new(window))),
            tx: Arc::new(tx),
        }
    }

    /// Receiver that always holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    /// Snapshot stream; dropping it unsubscribes.
    pub fn stream(&self) -> WatchStream<ProgressSnapshot> {
        WatchStream::new(self.subscribe())
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    /// See [`ProgressTracker::start`].
    pub fn start(&self, total_files: usize, total_bytes: u64) {
        self.apply(|t| t.start(total_files, total_bytes));
    }

    /// See [`ProgressTracker::update_file`].
    pub fn update_file(&self, index: usize, name: &str, transferred: u64, total: u64) {
        self.apply(|t| t.update_file(index, name, transferred, total));
    }

    /// See [`ProgressTracker::resume_file`].
    pub fn resume_file(&self, index: usize, name: &str, offset: u64, total: u64) {
        self.apply(|t| t.resume_file(index, name, offset, total));
    }

    /// Record file `index` as finished; returns the resulting snapshot.
    pub fn complete_file(&self, index: usize, success: bool) -> ProgressSnapshot {
        self.apply(|t| t.complete_file(index, success))
    }

    /// See [`ProgressTracker::finish`].
    pub fn finish(&self) {
        self.apply(ProgressTracker::finish);
    }

    /// See [`ProgressTracker::reset`].
    pub fn reset(&self) {
        self.apply(ProgressTracker::reset);
    }

    /// See [`ProgressTracker::cancel`].
    pub fn cancel(&self) {
        self.apply(ProgressTracker::cancel);
    }

    fn apply(&self, f: impl FnOnce(&mut ProgressTracker)) -> ProgressSnapshot {
        let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut tracker);
        let snapshot = tracker.snapshot().clone();
        self.tx.send_replace(snapshot.clone());
        snapshot
    }
}
