//! Transfer session orchestration.
//!
//! [`TransferSession`] ties the pieces together: it filters the user's
//! selection through the [`HistoryLedger`], runs exactly one transport
//! against an immutable [`TransferBatch`], prepares resumable
//! [`SessionState`] for the line transport, and finally records and
//! optionally deletes what was moved.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut session = TransferSession::open(config, Arc::new(FsCatalog::new()));
//! match session.compute_eligible_assets(&selected, true) {
//!     Eligibility::Ready(batch) => {
//!         let started = session.start(TransportKind::Http, batch).await?;
//!         println!("Open http://{}", started.local_addr);
//!     }
//!     Eligibility::Empty(reason) => println!("{reason}"),
//! }
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::asset::{AssetCatalog, TransferBatch, TransferableAsset};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::history::HistoryLedger;
use crate::progress::ProgressHub;
use crate::session::{SessionState, SessionStore};
use crate::transport::{BoundServer, ServerConfig, ServerHandle, TransferReporter, TransportKind};

/// Why there is nothing to transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// The selection was empty
    NothingSelected,
    /// Every selected asset was transferred before
    NothingNew,
}

impl fmt::Display for EmptyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingSelected => write!(f, "No files selected"),
            Self::NothingNew => write!(f, "All selected files were already transferred"),
        }
    }
}

/// Outcome of [`TransferSession::compute_eligible_assets`].
#[derive(Debug, Clone)]
pub enum Eligibility {
    /// A non-empty batch ready to serve
    Ready(TransferBatch),
    /// Nothing to serve
    Empty(EmptyReason),
}

/// Details of a started server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartedServer {
    /// Transport running
    pub kind: TransportKind,
    /// Address actually bound
    pub local_addr: SocketAddr,
    /// Assets in the batch
    pub file_count: usize,
    /// Bytes in the batch
    pub total_bytes: u64,
    /// Whether an interrupted job for this batch was picked up
    pub resumed: bool,
}

/// Tally of [`TransferSession::complete_and_delete`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    /// Assets deleted
    pub deleted: usize,
    /// Assets that could not be deleted
    pub failed: usize,
}

impl DeletionReport {
    /// Whether every asset was deleted.
    pub const fn is_complete(&self) -> bool {
        self.failed == 0
    }

    /// Turn a partial deletion into [`Error::PartialDeletion`].
    pub const fn ensure_complete(self) -> Result<Self> {
        if self.failed == 0 {
            Ok(self)
        } else {
            Err(Error::PartialDeletion {
                deleted: self.deleted,
                failed: self.failed,
            })
        }
    }
}

struct Running {
    server: ServerHandle,
    batch: TransferBatch,
}

/// Orchestrates one transfer session at a time.
pub struct TransferSession {
    config: Config,
    catalog: Arc<dyn AssetCatalog>,
    ledger: Arc<Mutex<HistoryLedger>>,
    store: Arc<Mutex<SessionStore>>,
    progress: ProgressHub,
    running: Option<Running>,
}

impl fmt::Debug for TransferSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferSession")
            .field("running", &self.running.as_ref().map(|r| r.server.kind()))
            .field("progress", &self.progress.snapshot())
            .finish_non_exhaustive()
    }
}

impl TransferSession {
    /// Create a session around already opened stores.
    pub fn new(
        config: Config,
        catalog: Arc<dyn AssetCatalog>,
        ledger: HistoryLedger,
        store: SessionStore,
    ) -> Self {
        let progress = ProgressHub::new(config.progress.throughput_window);
        Self {
            config,
            catalog,
            ledger: Arc::new(Mutex::new(ledger)),
            store: Arc::new(Mutex::new(store)),
            progress,
            running: None,
        }
    }

    /// Create a session with stores in the configured data directory.
    pub fn open(config: Config, catalog: Arc<dyn AssetCatalog>) -> Self {
        let ledger = HistoryLedger::open(config.history_path());
        let store = SessionStore::open(config.session_path(), config.history.max_sessions);
        Self::new(config, catalog, ledger, store)
    }

    /// Narrow a selection to what should be served.
    ///
    /// With `incremental`, assets already in the ledger are dropped.
    pub fn compute_eligible_assets(
        &self,
        selected: &[TransferableAsset],
        incremental: bool,
    ) -> Eligibility {
        if selected.is_empty() {
            return Eligibility::Empty(EmptyReason::NothingSelected);
        }

        let eligible = if incremental {
            self.lock_ledger().filter_new(selected)
        } else {
            selected.to_vec()
        };

        if eligible.is_empty() {
            tracing::info!(selected = selected.len(), "Nothing new to transfer");
            Eligibility::Empty(EmptyReason::NothingNew)
        } else {
            tracing::debug!(
                selected = selected.len(),
                eligible = eligible.len(),
                incremental,
                "Computed eligible assets"
            );
            Eligibility::Ready(TransferBatch::new(eligible))
        }
    }

    /// Serve `batch` over `kind` on the configured port.
    pub async fn start(&mut self, kind: TransportKind, batch: TransferBatch) -> Result<StartedServer> {
        let server_config = ServerConfig::from_config(kind, &self.config);
        self.start_with(server_config, batch).await
    }

    /// Serve `batch` with explicit server settings.
    ///
    /// Fails with [`Error::AddressInUse`] if the port is taken, including by
    /// this session's own server of the same kind, and with
    /// [`Error::SessionActive`] while a server of the other kind runs.
    pub async fn start_with(
        &mut self,
        server_config: ServerConfig,
        batch: TransferBatch,
    ) -> Result<StartedServer> {
        let kind = server_config.kind;
        if let Some(running) = &self.running {
            // the same transport is still holding its port
            if running.server.kind() == kind {
                return Err(Error::AddressInUse {
                    port: running.server.local_addr().port(),
                });
            }
            return Err(Error::SessionActive);
        }

        let bound = BoundServer::bind(&server_config).await?;
        self.progress.start(batch.len(), batch.total_bytes());

        let mut reporter = TransferReporter::new(self.progress.clone());
        if self.config.history.record_on_complete {
            reporter = reporter.with_ledger(Arc::clone(&self.ledger));
        }

        let mut resumed = false;
        if kind.is_resumable() {
            resumed = match self.prepare_session_state(&batch) {
                Ok(resumed) => resumed,
                Err(e) => {
                    self.progress.reset();
                    return Err(e);
                }
            };
            reporter = reporter.with_session(Arc::clone(&self.store), self.config.line.checkpoint_bytes);
        }

        let server = bound.serve(batch.clone(), Arc::clone(&self.catalog), reporter);

        let started = StartedServer {
            kind,
            local_addr: server.local_addr(),
            file_count: batch.len(),
            total_bytes: batch.total_bytes(),
            resumed,
        };
        tracing::info!(
            transport = %kind,
            addr = %started.local_addr,
            files = started.file_count,
            resumed,
            "Transfer session started"
        );
        self.running = Some(Running { server, batch });
        Ok(started)
    }

    /// Stop the running server, if any. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.server.shutdown().await;
        if self.progress.snapshot().is_active {
            self.progress.cancel();
        }
        tracing::info!(files = running.batch.len(), "Transfer session stopped");
    }

    /// Record `batch` in the history, delete it from the catalog and stop.
    ///
    /// The server is stopped whatever the outcome. If the history cannot
    /// be written nothing is deleted.
    pub async fn complete_and_delete(&mut self, batch: &TransferBatch) -> Result<DeletionReport> {
        let recorded = self.lock_ledger().record_transferred(batch);
        let outcome = match recorded {
            Ok(()) => Ok(self.delete_assets(batch).await),
            Err(e) => Err(e),
        };
        self.stop().await;
        outcome
    }

    /// Record assets as transferred without serving them.
    pub fn record_only(&self, assets: &[TransferableAsset]) -> Result<()> {
        self.lock_ledger().record_transferred(assets)
    }

    /// Whether a server is running.
    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Batch being served.
    pub fn batch(&self) -> Option<&TransferBatch> {
        self.running.as_ref().map(|r| &r.batch)
    }

    /// Address of the running server.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.server.local_addr())
    }

    /// Observable progress.
    pub fn progress(&self) -> &ProgressHub {
        &self.progress
    }

    /// The interrupted job left by a previous run, if any.
    pub fn incomplete_session(&self) -> Option<SessionState> {
        let store = self.lock_store();
        store
            .has_incomplete()
            .then(|| store.load().cloned())
            .flatten()
    }

    /// Shared history ledger.
    pub fn ledger(&self) -> &Arc<Mutex<HistoryLedger>> {
        &self.ledger
    }

    /// Shared session store.
    pub fn store(&self) -> &Arc<Mutex<SessionStore>> {
        &self.store
    }

    /// Active configuration.
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Keep a matching interrupted job or save a fresh one.
    ///
    /// Returns whether an interrupted job was kept.
    fn prepare_session_state(&self, batch: &TransferBatch) -> Result<bool> {
        let mut store = self.lock_store();
        let existing = store
            .load()
            .filter(|s| !s.completed && s.matches_batch(batch))
            .cloned();

        let Some(state) = existing else {
            store.save(SessionState::from_batch(batch))?;
            return Ok(false);
        };

        tracing::info!(
            session_id = %state.session_id,
            done = state.transferred_bytes(),
            total = state.total_bytes(),
            "Resuming interrupted session"
        );
        for (index, file) in state.files.iter().enumerate() {
            if file.transferred_bytes == 0 && !file.completed {
                continue;
            }
            self.progress.resume_file(
                index,
                &file.display_name,
                file.transferred_bytes,
                file.total_bytes,
            );
            if file.completed {
                self.progress.complete_file(index, true);
            }
        }
        Ok(true)
    }

    async fn delete_assets(&self, batch: &TransferBatch) -> DeletionReport {
        let mut report = DeletionReport::default();
        for asset in batch {
            match self.catalog.delete(asset).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    tracing::warn!(file = %asset.display_name, error = %e, "Failed to delete asset");
                    report.failed += 1;
                }
            }
        }
        tracing::info!(deleted = report.deleted, failed = report.failed, "Deleted transferred assets");
        report
    }

    fn lock_ledger(&self) -> MutexGuard<'_, HistoryLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_store(&self) -> MutexGuard<'_, SessionStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
