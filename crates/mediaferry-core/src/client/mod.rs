//! Companion client for the line protocol.
//!
//! Runs on the receiving machine (typically through `adb forward
//! tcp:12345 tcp:12345`). Each request opens its own connection, matching
//! the server's one-command-per-connection model.
//!
//! Downloads land in `<name>.part` first. If a part file is found on the
//! next run, the client asks for `RESUME <index> <part length>` and appends
//! to it; the finished file is renamed to a name that does not clobber an
//! existing file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::progress::ProgressHub;
use crate::protocol::{self, Command, LineListEntry};

/// Default time allowed to establish a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Suffix of in-progress downloads.
pub const PART_SUFFIX: &str = ".part";

/// Result of one finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    /// Final location of the file
    pub path: PathBuf,
    /// Bytes received over this connection
    pub bytes_received: u64,
    /// Whether the download continued a part file
    pub resumed: bool,
}

/// Totals of a [`LineClient::download_all`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadSummary {
    /// Files downloaded completely
    pub succeeded: usize,
    /// Files that failed (part files are kept for a later resume)
    pub failed: usize,
    /// Bytes received across all files
    pub bytes_received: u64,
}

/// Client for a line-protocol server.
#[derive(Debug, Clone)]
pub struct LineClient {
    addr: String,
    buffer_size: usize,
    connect_timeout: Duration,
}

impl LineClient {
    /// Client for the server at `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            buffer_size: crate::LINE_BUFFER_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Server address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Number of assets in the served batch.
    pub async fn count(&self) -> Result<usize> {
        let (mut reader, _writer) = self.request(Command::Count).await?;
        let line = protocol::read_header_line(&mut reader).await?;
        if line == protocol::STATUS_ERROR {
            let message = protocol::read_header_line(&mut reader).await?;
            return Err(Error::Remote(message));
        }
        let count = protocol::parse_number(&line, "count")?;
        usize::try_from(count).map_err(|_| Error::ProtocolError(format!("count {count} too large")))
    }

    /// Every asset in the served batch.
    pub async fn list(&self) -> Result<Vec<LineListEntry>> {
        let (mut reader, _writer) = self.request(Command::List).await?;
        protocol::read_status(&mut reader).await?;
        let len = protocol::parse_number(&protocol::read_header_line(&mut reader).await?, "length")?;
        let len = usize::try_from(len)
            .ok()
            .filter(|&len| len <= protocol::MAX_LIST_LEN)
            .ok_or_else(|| Error::ProtocolError(format!("list length {len} too large")))?;

        let mut json = vec![0u8; len];
        reader.read_exact(&mut json).await?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Download one asset into `dest_dir`, resuming a part file if present.
    ///
    /// Progress is reported to `progress`; the caller decides when to
    /// [`start`](ProgressHub::start) and [`finish`](ProgressHub::finish) it.
    pub async fn download(
        &self,
        entry: &LineListEntry,
        dest_dir: &Path,
        progress: &ProgressHub,
    ) -> Result<DownloadOutcome> {
        let result = self.fetch(entry, dest_dir, progress).await;
        progress.complete_file(entry.index, result.is_ok());
        result
    }

    /// Download every asset of the batch into `dest_dir`.
    ///
    /// Individual failures are counted, not returned; only listing the
    /// batch can fail the whole run.
    pub async fn download_all(&self, dest_dir: &Path, progress: &ProgressHub) -> Result<DownloadSummary> {
        let entries = self.list().await?;
        fs::create_dir_all(dest_dir).await?;

        progress.start(entries.len(), entries.iter().map(|e| e.size).sum());
        let mut summary = DownloadSummary::default();

        for entry in &entries {
            match self.download(entry, dest_dir, progress).await {
                Ok(outcome) => {
                    summary.succeeded += 1;
                    summary.bytes_received += outcome.bytes_received;
                }
                Err(e) => {
                    tracing::warn!(index = entry.index, file = %entry.name, error = %e, "Download failed");
                    summary.failed += 1;
                }
            }
        }

        progress.finish();
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            bytes = summary.bytes_received,
            "Download run finished"
        );
        Ok(summary)
    }

    async fn fetch(
        &self,
        entry: &LineListEntry,
        dest_dir: &Path,
        progress: &ProgressHub,
    ) -> Result<DownloadOutcome> {
        let file_name = local_file_name(entry);
        let part_path = dest_dir.join(format!("{file_name}{PART_SUFFIX}"));
        let existing = fs::metadata(&part_path).await.map_or(0, |m| m.len());

        if existing == entry.size && existing > 0 {
            progress.resume_file(entry.index, &entry.name, existing, entry.size);
            let path = finalize(&part_path, dest_dir, &file_name).await?;
            return Ok(DownloadOutcome {
                path,
                bytes_received: 0,
                resumed: true,
            });
        }

        let resumed = existing > 0 && existing < entry.size;
        let command = if resumed {
            Command::Resume {
                index: entry.index,
                offset: existing,
            }
        } else {
            Command::Get { index: entry.index }
        };

        let (mut reader, _writer) = self.request(command).await?;
        let header = protocol::read_file_header(&mut reader, resumed).await?;
        if header.size != entry.size {
            return Err(Error::ProtocolError(format!(
                "'{}' changed size on the device ({} -> {})",
                entry.name, entry.size, header.size
            )));
        }

        let mut file = if resumed {
            progress.resume_file(entry.index, &entry.name, header.offset, header.size);
            OpenOptions::new().append(true).open(&part_path).await?
        } else {
            progress.update_file(entry.index, &entry.name, 0, header.size);
            fs::File::create(&part_path).await?
        };

        let expected = header.payload_len();
        let mut received = 0u64;
        let mut buf = vec![0u8; self.buffer_size];
        while received < expected {
            let want = buf
                .len()
                .min(usize::try_from(expected - received).unwrap_or(usize::MAX));
            let n = reader.read(&mut buf[..want]).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            received += n as u64;
            progress.update_file(entry.index, &entry.name, header.offset + received, header.size);
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if received < expected {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "connection closed after {} of {} bytes of '{}'",
                    header.offset + received,
                    header.size,
                    entry.name
                ),
            )));
        }

        let path = finalize(&part_path, dest_dir, &file_name).await?;
        tracing::info!(file = %path.display(), bytes = received, resumed, "Downloaded");
        Ok(DownloadOutcome {
            path,
            bytes_received: received,
            resumed,
        })
    }

    async fn request(&self, command: Command) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connecting to {} timed out", self.addr),
                ))
            })??;
        stream.set_nodelay(true)?;

        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(command.encode().as_bytes()).await?;
        write_half.flush().await?;

        Ok((BufReader::with_capacity(self.buffer_size, read_half), write_half))
    }
}

/// File name for an entry, stripped of any directory components.
fn local_file_name(entry: &LineListEntry) -> String {
    let base = entry
        .name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        format!("file_{}", entry.index)
    } else {
        base.to_string()
    }
}

/// Move a finished part file to a free name in `dest_dir`.
async fn finalize(part_path: &Path, dest_dir: &Path, file_name: &str) -> Result<PathBuf> {
    let target = unique_path(dest_dir, file_name);
    fs::rename(part_path, &target).await?;
    Ok(target)
}

/// `dest_dir/name`, or `name_1.ext`, `name_2.ext`, ... if taken.
fn unique_path(dest_dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dest_dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match file_name.rfind('.') {
        Some(dot) if dot > 0 => (&file_name[..dot], &file_name[dot..]),
        _ => (file_name, ""),
    };
    (1u32..)
        .map(|n| dest_dir.join(format!("{stem}_{n}{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
