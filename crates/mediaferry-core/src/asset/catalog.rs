//! The asset catalog seam and its filesystem implementation.

use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::AsyncRead;

use super::{MediaKind, TransferableAsset};
use crate::error::Result;

/// Byte stream of one asset.
pub type AssetReader = Box<dyn AsyncRead + Send + Unpin>;

/// Source of asset bytes.
///
/// The engine never scans storage itself: it only opens and deletes assets
/// it was handed. Implementations must be shareable across connection tasks.
pub trait AssetCatalog: Send + Sync + 'static {
    /// Open the asset's byte stream from the beginning.
    fn open<'a>(&'a self, asset: &'a TransferableAsset) -> BoxFuture<'a, io::Result<AssetReader>>;

    /// Delete the underlying asset.
    fn delete<'a>(&'a self, asset: &'a TransferableAsset) -> BoxFuture<'a, io::Result<()>>;
}

/// Options for [`FsCatalog::enumerate`].
#[derive(Debug, Clone, Default)]
pub struct EnumerateOptions {
    /// Keep files that are neither images nor videos
    pub include_all: bool,
    /// Keep dot-files
    pub include_hidden: bool,
    /// Maximum directory depth
    pub max_depth: Option<usize>,
}

/// Asset catalog backed by the local filesystem.
///
/// Asset paths are absolute (or caller-relative) filesystem paths.
#[derive(Debug, Clone, Default)]
pub struct FsCatalog;

impl FsCatalog {
    /// Create a filesystem catalog.
    pub const fn new() -> Self {
        Self
    }

    /// Enumerate assets below the given files and directories.
    ///
    /// Results are sorted by path and numbered from 1 in that order.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file cannot be read.
    pub fn enumerate(
        &self,
        paths: &[PathBuf],
        options: &EnumerateOptions,
    ) -> Result<Vec<TransferableAsset>> {
        let mut files = Vec::new();

        for path in paths {
            if path.is_file() {
                files.push(path.clone());
            } else if path.is_dir() {
                collect_directory(path, options, &mut files);
            } else {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} does not exist", path.display()),
                )
                .into());
            }
        }

        files.sort();
        files.dedup();

        let mut assets = Vec::with_capacity(files.len());
        for path in files {
            let asset = describe(&path, assets.len() as u64 + 1)?;
            if options.include_all || asset.kind() != MediaKind::Other {
                assets.push(asset);
            }
        }

        tracing::debug!(count = assets.len(), "Enumerated assets");
        Ok(assets)
    }
}

impl AssetCatalog for FsCatalog {
    fn open<'a>(&'a self, asset: &'a TransferableAsset) -> BoxFuture<'a, io::Result<AssetReader>> {
        async move {
            let file = tokio::fs::File::open(&asset.path).await?;
            Ok(Box::new(file) as AssetReader)
        }
        .boxed()
    }

    fn delete<'a>(&'a self, asset: &'a TransferableAsset) -> BoxFuture<'a, io::Result<()>> {
        tokio::fs::remove_file(&asset.path).boxed()
    }
}

fn collect_directory(dir: &Path, options: &EnumerateOptions, files: &mut Vec<PathBuf>) {
    let walker = walkdir::WalkDir::new(dir).max_depth(options.max_depth.unwrap_or(usize::MAX));

    for entry in walker
        .into_iter()
        .filter_entry(|e| options.include_hidden || e.depth() == 0 || !is_hidden(e.path()))
        .filter_map(std::result::Result::ok)
    {
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

fn describe(path: &Path, id: u64) -> Result<TransferableAsset> {
    let metadata = std::fs::metadata(path)?;
    let modified_at = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));
    let display_name = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().to_string());
    let mime_type = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    Ok(TransferableAsset::new(
        id,
        path.to_string_lossy(),
        display_name,
        metadata.len(),
        mime_type,
        modified_at,
    ))
}
