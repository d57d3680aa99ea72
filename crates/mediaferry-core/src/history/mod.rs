//! Ledger of previously transferred assets.
//!
//! The ledger answers "has this asset been moved before?" so incremental
//! sessions only offer what is new. An asset counts as transferred when an
//! entry with the same path, size and modification time exists; a changed
//! size or timestamp makes it new again. No content hashing is done.
//!
//! The ledger is persisted as JSON. A missing or unreadable file yields an
//! empty ledger instead of an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asset::TransferableAsset;
use crate::error::Result;
use crate::persist;

/// A single ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Catalog id at the time of the transfer
    #[serde(rename = "fileId")]
    pub id: u64,
    /// Path identity (the ledger key)
    #[serde(rename = "filePath")]
    pub path: String,
    /// Display name
    #[serde(rename = "fileName")]
    pub display_name: String,
    /// Size in bytes
    #[serde(rename = "fileSize")]
    pub size: u64,
    /// Modification time in seconds since the Unix epoch
    #[serde(rename = "dateModified")]
    pub modified_at: i64,
    /// When the transfer was recorded
    #[serde(rename = "transferTime", with = "chrono::serde::ts_milliseconds")]
    pub transferred_at: DateTime<Utc>,
}

impl HistoryEntry {
    fn from_asset(asset: &TransferableAsset, transferred_at: DateTime<Utc>) -> Self {
        Self {
            id: asset.id,
            path: asset.path.clone(),
            display_name: asset.display_name.clone(),
            size: asset.byte_size,
            modified_at: asset.modified_at,
            transferred_at,
        }
    }

    /// Whether this entry describes the asset in its current state.
    pub fn matches(&self, asset: &TransferableAsset) -> bool {
        self.path == asset.path && self.size == asset.byte_size && self.modified_at == asset.modified_at
    }
}

/// Serializable wrapper for the ledger file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerDatabase {
    version: u32,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    last_transfer_time: Option<DateTime<Utc>>,
    entries: Vec<HistoryEntry>,
}

/// Persisted record of transferred assets, keyed by path.
#[derive(Debug)]
pub struct HistoryLedger {
    path: PathBuf,
    entries: HashMap<String, HistoryEntry>,
    last_transfer_time: Option<DateTime<Utc>>,
}

impl HistoryLedger {
    /// Open the ledger stored at `path`.
    ///
    /// A missing or corrupt file is logged and treated as an empty ledger.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (entries, last_transfer_time) = match persist::read_json::<LedgerDatabase>(&path) {
            Ok(Some(db)) => (
                db.entries
                    .into_iter()
                    .map(|e| (e.path.clone(), e))
                    .collect(),
                db.last_transfer_time,
            ),
            Ok(None) => (HashMap::new(), None),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "History ledger unreadable, starting empty"
                );
                (HashMap::new(), None)
            }
        };

        Self {
            path,
            entries,
            last_transfer_time,
        }
    }

    /// Whether `asset` was transferred before in its current state.
    pub fn is_transferred(&self, asset: &TransferableAsset) -> bool {
        self.entries
            .get(&asset.path)
            .is_some_and(|entry| entry.matches(asset))
    }

    /// Upsert entries for `assets` and stamp the last transfer time.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be saved.
    pub fn record_transferred<'a, I>(&mut self, assets: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a TransferableAsset>,
    {
        let now = Utc::now();
        let mut recorded = 0usize;
        for asset in assets {
            self.entries
                .insert(asset.path.clone(), HistoryEntry::from_asset(asset, now));
            recorded += 1;
        }
        self.last_transfer_time = Some(now);

        tracing::debug!(recorded, total = self.entries.len(), "Recorded transfers");
        self.save()
    }

    /// Assets not yet transferred in their current state, order preserved.
    pub fn filter_new(&self, assets: &[TransferableAsset]) -> Vec<TransferableAsset> {
        assets
            .iter()
            .filter(|a| !self.is_transferred(a))
            .cloned()
            .collect()
    }

    /// Forget one path.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be saved.
    pub fn remove(&mut self, path: &str) -> Result<bool> {
        let removed = self.entries.remove(path).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Forget several paths, returning how many were known.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be saved.
    pub fn remove_many<'a, I>(&mut self, paths: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let removed = paths
            .into_iter()
            .filter(|p| self.entries.remove(*p).is_some())
            .count();
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    /// Remove every entry and the last transfer time.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be saved.
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.last_transfer_time = None;
        self.save()
    }

    /// Number of recorded assets.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// All entries, most recently transferred first.
    pub fn list_all(&self) -> Vec<HistoryEntry> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            b.transferred_at
                .cmp(&a.transferred_at)
                .then_with(|| a.path.cmp(&b.path))
        });
        entries
    }

    /// When `record_transferred` last ran.
    pub fn last_transfer_time(&self) -> Option<DateTime<Utc>> {
        self.last_transfer_time
    }

    /// Location of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<()> {
        let db = LedgerDatabase {
            version: 1,
            last_transfer_time: self.last_transfer_time,
            entries: self.list_all(),
        };
        persist::write_json_atomic(&self.path, &db)
    }
}
