//! Byte-count reporting shared by both transports.

use std::sync::{Arc, Mutex, PoisonError};

use crate::asset::TransferableAsset;
use crate::error::Result;
use crate::history::HistoryLedger;
use crate::progress::ProgressHub;
use crate::session::SessionStore;

/// Sink for transfer events coming from connection tasks.
///
/// Feeds the [`ProgressHub`] and, when attached, checkpoints offsets into
/// the [`SessionStore`] and records finished files into the
/// [`HistoryLedger`]. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct TransferReporter {
    progress: ProgressHub,
    session: Option<Arc<Mutex<SessionStore>>>,
    ledger: Option<Arc<Mutex<HistoryLedger>>>,
    checkpoint_bytes: u64,
}

impl TransferReporter {
    /// Reporter that only updates progress.
    pub fn new(progress: ProgressHub) -> Self {
        Self {
            progress,
            session: None,
            ledger: None,
            checkpoint_bytes: crate::DEFAULT_CHECKPOINT_BYTES,
        }
    }

    /// Persist per-file offsets every `checkpoint_bytes` and on completion.
    #[must_use]
    pub fn with_session(mut self, store: Arc<Mutex<SessionStore>>, checkpoint_bytes: u64) -> Self {
        self.session = Some(store);
        self.checkpoint_bytes = checkpoint_bytes.max(1);
        self
    }

    /// Record every successfully streamed file into `ledger`.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<Mutex<HistoryLedger>>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// The progress hub being fed.
    pub fn progress(&self) -> &ProgressHub {
        &self.progress
    }

    /// Start reporting file `index`, streamed from `offset`.
    pub fn begin(&self, index: usize, asset: &TransferableAsset, offset: u64) -> FileReport {
        if offset > 0 {
            self.progress
                .resume_file(index, &asset.display_name, offset, asset.byte_size);
        } else {
            self.progress
                .update_file(index, &asset.display_name, 0, asset.byte_size);
        }
        self.update_session(|store| store.update_offset(index, offset));

        FileReport {
            reporter: self.clone(),
            index,
            asset: asset.clone(),
            position: offset,
            last_checkpoint: offset,
            finished: false,
        }
    }

    fn update_session(&self, f: impl FnOnce(&mut SessionStore) -> Result<()>) {
        let Some(store) = &self.session else {
            return;
        };
        let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = f(&mut store) {
            tracing::warn!(error = %e, "Failed to persist session state");
        }
    }

    fn record_history(&self, asset: &TransferableAsset) {
        let Some(ledger) = &self.ledger else {
            return;
        };
        let mut ledger = ledger.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = ledger.record_transferred([asset]) {
            tracing::warn!(file = %asset.display_name, error = %e, "Failed to record transfer");
        }
    }
}

/// Reporting handle for one file being streamed.
///
/// Dropping it before [`finish`](Self::finish) counts the file as failed
/// and checkpoints the bytes sent so far.
#[derive(Debug)]
pub struct FileReport {
    reporter: TransferReporter,
    index: usize,
    asset: TransferableAsset,
    position: u64,
    last_checkpoint: u64,
    finished: bool,
}

impl FileReport {
    /// Account for `bytes` more bytes sent.
    pub fn advance(&mut self, bytes: u64) {
        self.position += bytes;
        self.reporter.progress.update_file(
            self.index,
            &self.asset.display_name,
            self.position,
            self.asset.byte_size,
        );

        if self.position - self.last_checkpoint >= self.reporter.checkpoint_bytes {
            self.checkpoint();
        }
    }

    /// Offset reached so far.
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Complete the file.
    pub fn finish(mut self, success: bool) {
        self.complete(success);
    }

    fn checkpoint(&mut self) {
        let (index, position) = (self.index, self.position);
        self.reporter
            .update_session(|store| store.update_offset(index, position));
        self.last_checkpoint = position;
    }

    fn complete(&mut self, success: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        let index = self.index;

        if success {
            tracing::info!(index, file = %self.asset.display_name, "File sent");
            self.reporter.update_session(|store| {
                store.mark_file_completed(index)?;
                if store.load().is_some_and(crate::session::SessionState::is_all_files_completed) {
                    store.mark_session_completed()?;
                }
                Ok(())
            });
            self.reporter.record_history(&self.asset);
        } else {
            tracing::warn!(
                index,
                file = %self.asset.display_name,
                sent = self.position,
                "File transfer interrupted"
            );
            self.checkpoint();
        }

        let snapshot = self.reporter.progress.complete_file(index, success);
        if snapshot.all_files_done() {
            self.reporter.progress.finish();
        }
    }
}

impl Drop for FileReport {
    fn drop(&mut self) {
        self.complete(false);
    }
}
