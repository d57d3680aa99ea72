//! Line protocol spoken between the device and the companion client.
//!
//! One command per connection, newline terminated ASCII. The server answers
//! and closes the connection.
//!
//! ## Commands
//!
//! ```text
//! LIST                   -> OK\n<json byte length>\n<json array>
//! COUNT                  -> <n>\n
//! GET <index>            -> OK\n<size>\n<name>\n<size bytes>
//! RESUME <index> <off>   -> OK\n<size>\n<off>\n<name>\n<size - off bytes>
//! anything else          -> ERROR\nUnknown command\n
//! ```
//!
//! Failures answer `ERROR\n<message>\n` and send no payload. Names are
//! escaped so a header line can never be split (see [`escape_name`]).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::asset::TransferableAsset;
use crate::error::{Error, Result};

/// Longest command line accepted, newline included.
pub const MAX_COMMAND_LEN: usize = 256;

/// Longest response header line accepted by the client.
pub const MAX_HEADER_LEN: usize = 4096;

/// Largest `LIST` document accepted by the client.
pub const MAX_LIST_LEN: usize = 64 * 1024 * 1024;

/// Status line of a successful response.
pub const STATUS_OK: &str = "OK";

/// Status line of a failed response.
pub const STATUS_ERROR: &str = "ERROR";

/// Message sent when the catalog cannot open an asset.
pub const MSG_CANNOT_OPEN: &str = "Cannot open file";

/// Message sent when a resume offset cannot be reached.
pub const MSG_SEEK_FAILED: &str = "Failed to seek to offset";

/// A parsed client command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// List every asset in the batch
    List,
    /// Number of assets in the batch
    Count,
    /// Stream a whole asset
    Get {
        /// Batch index
        index: usize,
    },
    /// Stream an asset from a byte offset
    Resume {
        /// Batch index
        index: usize,
        /// Bytes the client already holds
        offset: u64,
    },
}

/// Why a command line was rejected. `Display` is the wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Not a known command
    #[error("Unknown command")]
    Unknown,
    /// `GET` with a non-numeric or out-of-range index
    #[error("Invalid file index")]
    InvalidIndex,
    /// `RESUME` with a bad index or offset
    #[error("Invalid resume parameters")]
    InvalidResumeParameters,
    /// `RESUME` with the wrong number of arguments
    #[error("Invalid resume command")]
    InvalidResumeCommand,
}

impl Command {
    /// Parse one command line (surrounding whitespace ignored).
    pub fn parse(line: &str) -> std::result::Result<Self, CommandError> {
        let line = line.trim();
        match line {
            "LIST" => return Ok(Self::List),
            "COUNT" => return Ok(Self::Count),
            _ => {}
        }

        if let Some(arg) = line.strip_prefix("GET ") {
            let index = arg.trim().parse().map_err(|_| CommandError::InvalidIndex)?;
            return Ok(Self::Get { index });
        }

        if let Some(args) = line.strip_prefix("RESUME ") {
            let parts: Vec<&str> = args.split_whitespace().collect();
            let [index, offset] = parts.as_slice() else {
                return Err(CommandError::InvalidResumeCommand);
            };
            let index = index
                .parse()
                .map_err(|_| CommandError::InvalidResumeParameters)?;
            let offset = offset
                .parse()
                .map_err(|_| CommandError::InvalidResumeParameters)?;
            return Ok(Self::Resume { index, offset });
        }

        Err(CommandError::Unknown)
    }

    /// Wire form, newline included.
    pub fn encode(&self) -> String {
        match self {
            Self::List => "LIST\n".to_string(),
            Self::Count => "COUNT\n".to_string(),
            Self::Get { index } => format!("GET {index}\n"),
            Self::Resume { index, offset } => format!("RESUME {index} {offset}\n"),
        }
    }
}

/// One element of the `LIST` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineListEntry {
    /// Batch index (the `GET` address)
    pub index: usize,
    /// Catalog id
    pub id: u64,
    /// Display name
    pub name: String,
    /// Path identity on the device
    pub path: String,
    /// Size in bytes
    pub size: u64,
    /// `"image"` or `"video"`
    #[serde(rename = "type")]
    pub kind: String,
    /// MIME type
    pub mime_type: String,
    /// Modification time in seconds since the Unix epoch
    pub date_modified: i64,
}

impl LineListEntry {
    /// Describe the asset at `index`.
    pub fn from_asset(index: usize, asset: &TransferableAsset) -> Self {
        Self {
            index,
            id: asset.id,
            name: asset.display_name.clone(),
            path: asset.path.clone(),
            size: asset.byte_size,
            kind: asset.kind().wire_name().to_string(),
            mime_type: asset.mime_type.clone(),
            date_modified: asset.modified_at,
        }
    }
}

/// Header preceding a streamed asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Full size of the asset
    pub size: u64,
    /// Offset the stream starts at (0 for `GET`)
    pub offset: u64,
    /// Display name
    pub name: String,
}

impl FileHeader {
    /// Bytes that follow the header.
    pub const fn payload_len(&self) -> u64 {
        self.size.saturating_sub(self.offset)
    }

    /// Encode as a `GET` header (`offset == 0`) or a `RESUME` header.
    pub fn encode(&self, resumed: bool) -> String {
        let name = escape_name(&self.name);
        if resumed {
            format!("{STATUS_OK}\n{}\n{}\n{name}\n", self.size, self.offset)
        } else {
            format!("{STATUS_OK}\n{}\n{name}\n", self.size)
        }
    }
}

/// Escape characters that would break a header line.
pub fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

/// Reverse [`escape_name`]. Unknown escapes are kept verbatim.
pub fn unescape_name(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Read the command line of a connection.
///
/// Returns `None` if the peer closed without sending anything. An
/// over-long or non-UTF-8 line is a [`Error::ProtocolError`].
pub async fn read_command<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let read = reader
        .take(MAX_COMMAND_LEN as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with(b"\n") && read >= MAX_COMMAND_LEN {
        return Err(Error::ProtocolError("command line too long".to_string()));
    }
    String::from_utf8(line)
        .map(Some)
        .map_err(|_| Error::ProtocolError("command is not valid UTF-8".to_string()))
}

/// Write an `ERROR` response.
pub async fn write_error<W>(writer: &mut W, message: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(format!("{STATUS_ERROR}\n{message}\n").as_bytes())
        .await?;
    Ok(())
}

/// Write the `LIST` response for a JSON document.
pub async fn write_list<W>(writer: &mut W, json: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(format!("{STATUS_OK}\n{}\n", json.len()).as_bytes())
        .await?;
    writer.write_all(json.as_bytes()).await?;
    Ok(())
}

/// Read one header line without its terminator.
pub async fn read_header_line<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    reader
        .take(MAX_HEADER_LEN as u64)
        .read_line(&mut line)
        .await?;
    if !line.ends_with('\n') {
        return Err(Error::ProtocolError(if line.is_empty() {
            "connection closed before response".to_string()
        } else {
            "truncated response header".to_string()
        }));
    }
    let trimmed = line.trim_end_matches(['\n', '\r']);
    Ok(trimmed.to_string())
}

/// Read a status line; an `ERROR` response becomes [`Error::Remote`].
pub async fn read_status<R>(reader: &mut R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let status = read_header_line(reader).await?;
    match status.as_str() {
        STATUS_OK => Ok(()),
        STATUS_ERROR => {
            let message = read_header_line(reader)
                .await
                .unwrap_or_else(|_| "unspecified error".to_string());
            Err(Error::Remote(message))
        }
        other => Err(Error::ProtocolError(format!("unexpected status '{other}'"))),
    }
}

/// Read the header of a `GET` (`resumed == false`) or `RESUME` response.
pub async fn read_file_header<R>(reader: &mut R, resumed: bool) -> Result<FileHeader>
where
    R: AsyncBufRead + Unpin,
{
    read_status(reader).await?;
    let size = parse_number(&read_header_line(reader).await?, "size")?;
    let offset = if resumed {
        parse_number(&read_header_line(reader).await?, "offset")?
    } else {
        0
    };
    let name = unescape_name(&read_header_line(reader).await?);
    Ok(FileHeader { size, offset, name })
}

/// Parse a decimal header field.
pub fn parse_number(value: &str, field: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::ProtocolError(format!("invalid {field} '{value}'")))
}
