//! Transferable assets and batches.
//!
//! An asset is a single photo or video known to the [`AssetCatalog`]. A
//! [`TransferBatch`] is the ordered, immutable selection handed to a
//! transport; an asset's position in the batch is its wire address
//! (`GET <index>`, `/download/<index>`).

mod catalog;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use catalog::{AssetCatalog, AssetReader, EnumerateOptions, FsCatalog};

/// Broad media class of an asset, derived from its MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// `image/*`
    Image,
    /// `video/*`
    Video,
    /// Anything else
    Other,
}

impl MediaKind {
    /// Classify a MIME type.
    #[must_use]
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("video/") {
            Self::Video
        } else if mime.starts_with("image/") {
            Self::Image
        } else {
            Self::Other
        }
    }

    /// Value of the `type` field on the wire.
    ///
    /// Clients only distinguish videos from everything else.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Image | Self::Other => "image",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "Image"),
            Self::Video => write!(f, "Video"),
            Self::Other => write!(f, "File"),
        }
    }
}

/// A single asset that can be transferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferableAsset {
    /// Catalog-assigned identifier
    pub id: u64,
    /// Path identity; also the handle the catalog opens
    pub path: String,
    /// Name shown to users and used for the downloaded file
    pub display_name: String,
    /// Size in bytes
    pub byte_size: u64,
    /// MIME type
    pub mime_type: String,
    /// Modification time in seconds since the Unix epoch
    pub modified_at: i64,
    /// Pixel dimensions, when the catalog knows them
    pub dimensions: Option<(u32, u32)>,
    /// Duration of a video in milliseconds
    pub duration_ms: Option<u64>,
}

impl TransferableAsset {
    /// Create an asset without optional media metadata.
    pub fn new(
        id: u64,
        path: impl Into<String>,
        display_name: impl Into<String>,
        byte_size: u64,
        mime_type: impl Into<String>,
        modified_at: i64,
    ) -> Self {
        Self {
            id,
            path: path.into(),
            display_name: display_name.into(),
            byte_size,
            mime_type: mime_type.into(),
            modified_at,
            dimensions: None,
            duration_ms: None,
        }
    }

    /// Set pixel dimensions.
    #[must_use]
    pub const fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = Some((width, height));
        self
    }

    /// Set the video duration.
    #[must_use]
    pub const fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Media class of this asset.
    pub fn kind(&self) -> MediaKind {
        MediaKind::from_mime(&self.mime_type)
    }

    /// `WIDTHxHEIGHT`, if known.
    pub fn resolution(&self) -> Option<String> {
        self.dimensions.map(|(w, h)| format!("{w}x{h}"))
    }

    /// Formatted duration for videos.
    pub fn formatted_duration(&self) -> Option<String> {
        self.duration_ms
            .filter(|_| self.kind() == MediaKind::Video)
            .map(format_duration_ms)
    }
}

/// Ordered, immutable selection of assets for one session.
///
/// Cloning is cheap; every clone shares the same slice, so a running server
/// and the orchestrator always agree on what index `i` refers to.
#[derive(Debug, Clone, Default)]
pub struct TransferBatch {
    assets: Arc<[TransferableAsset]>,
}

impl TransferBatch {
    /// Freeze a list of assets into a batch.
    pub fn new(assets: Vec<TransferableAsset>) -> Self {
        Self {
            assets: assets.into(),
        }
    }

    /// Asset at a wire index.
    pub fn get(&self, index: usize) -> Option<&TransferableAsset> {
        self.assets.get(index)
    }

    /// Number of assets.
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Whether the batch holds no assets.
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Iterate the assets in wire order.
    pub fn iter(&self) -> std::slice::Iter<'_, TransferableAsset> {
        self.assets.iter()
    }

    /// The assets as a slice.
    pub fn as_slice(&self) -> &[TransferableAsset] {
        &self.assets
    }

    /// Sum of all asset sizes.
    pub fn total_bytes(&self) -> u64 {
        self.assets.iter().map(|a| a.byte_size).sum()
    }
}

impl From<Vec<TransferableAsset>> for TransferBatch {
    fn from(assets: Vec<TransferableAsset>) -> Self {
        Self::new(assets)
    }
}

impl<'a> IntoIterator for &'a TransferBatch {
    type Item = &'a TransferableAsset;
    type IntoIter = std::slice::Iter<'a, TransferableAsset>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Format bytes as a human-readable size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Format a duration as `M:SS` or `H:MM:SS`.
pub fn format_duration_ms(duration_ms: u64) -> String {
    let total_secs = duration_ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video() -> TransferableAsset {
        TransferableAsset::new(7, "/dcim/clip.mp4", "clip.mp4", 4096, "video/mp4", 1_700_000_000)
            .with_dimensions(1920, 1080)
            .with_duration_ms(3_725_000)
    }

    #[test]
    fn test_media_kind_from_mime() {
        assert_eq!(MediaKind::from_mime("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("image/jpeg"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime("application/pdf"), MediaKind::Other);
        assert_eq!(MediaKind::Other.wire_name(), "image");
    }

    #[test]
    fn test_asset_media_metadata() {
        let asset = video();
        assert_eq!(asset.resolution().as_deref(), Some("1920x1080"));
        assert_eq!(asset.formatted_duration().as_deref(), Some("1:02:05"));

        let photo = TransferableAsset::new(1, "/a.jpg", "a.jpg", 10, "image/jpeg", 0)
            .with_duration_ms(5000);
        assert_eq!(photo.formatted_duration(), None);
    }

    #[test]
    fn test_batch_shares_assets() {
        let batch = TransferBatch::new(vec![
            video(),
            TransferableAsset::new(8, "/dcim/a.jpg", "a.jpg", 100, "image/jpeg", 0),
        ]);
        let clone = batch.clone();

        assert_eq!(clone.len(), 2);
        assert_eq!(clone.total_bytes(), 4196);
        assert_eq!(clone.get(1).map(|a| a.id), Some(8));
        assert!(clone.get(2).is_none());
        assert!(std::ptr::eq(batch.as_slice(), clone.as_slice()));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ms(0), "0:00");
        assert_eq!(format_duration_ms(65_000), "1:05");
        assert_eq!(format_duration_ms(3_600_000), "1:00:00");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
