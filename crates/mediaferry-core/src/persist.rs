//! JSON document persistence shared by the history ledger and session store.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Read a JSON document, `None` if the file does not exist.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let reader = BufReader::new(fs::File::open(path)?);
    Ok(Some(serde_json::from_reader(reader)?))
}

/// Write a JSON document through a temp file renamed into place. Readers
/// see either the previous or the new document, never a partial one.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("json.tmp");
    let mut writer = BufWriter::new(fs::File::create(&temp_path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?
        .sync_all()?;
    fs::rename(&temp_path, path)?;

    tracing::trace!(path = %path.display(), "Persisted state");
    Ok(())
}
