//! Line-protocol server for the companion client.
//!
//! See [`crate::protocol`] for the wire format. Every accepted connection
//! runs on its own task; a failing connection is logged and never stops
//! the accept loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use super::{configure_stream, TransportContext};
use crate::asset::AssetReader;
use crate::error::{Error, Result};
use crate::protocol::{self, Command, CommandError, FileHeader, LineListEntry};

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

pub(crate) async fn serve(listener: TcpListener, ctx: Arc<TransportContext>) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            () = ctx.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    configure_stream(&stream, ctx.buffer_size * 4);
                    let ctx = Arc::clone(&ctx);
                    connections.spawn(async move {
                        tokio::select! {
                            () = ctx.shutdown.cancelled() => {
                                tracing::debug!(%peer, "Connection cancelled");
                            }
                            result = handle_connection(stream, peer, &ctx) => {
                                if let Err(e) = result {
                                    tracing::warn!(%peer, error = %e, "Line connection failed");
                                }
                            }
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }

        while connections.try_join_next().is_some() {}
    }

    connections.shutdown().await;
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: &TransportContext) -> Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::with_capacity(ctx.buffer_size, write_half);

    let command = match protocol::read_command(&mut reader).await {
        Ok(Some(line)) => Command::parse(&line),
        Ok(None) => return Ok(()),
        Err(Error::ProtocolError(_)) => Err(CommandError::Unknown),
        Err(e) => return Err(e),
    };
    tracing::debug!(%peer, ?command, "Line command");

    respond(&mut writer, ctx, command).await?;
    writer.shutdown().await?;
    Ok(())
}

async fn respond<W>(
    writer: &mut W,
    ctx: &TransportContext,
    command: std::result::Result<Command, CommandError>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match command {
        Ok(Command::List) => {
            let entries: Vec<LineListEntry> = ctx
                .batch
                .iter()
                .enumerate()
                .map(|(index, asset)| LineListEntry::from_asset(index, asset))
                .collect();
            let mut json = serde_json::to_string(&entries)?;
            json.push('\n');
            protocol::write_list(writer, &json).await
        }
        Ok(Command::Count) => {
            writer
                .write_all(format!("{}\n", ctx.batch.len()).as_bytes())
                .await?;
            Ok(())
        }
        Ok(Command::Get { index }) => send_file(writer, ctx, index, None).await,
        Ok(Command::Resume { index, offset }) => send_file(writer, ctx, index, Some(offset)).await,
        Err(rejection) => protocol::write_error(writer, &rejection.to_string()).await,
    }
}

/// Stream asset `index`, optionally from a resume offset.
///
/// Every failure detected before the header is written is answered with
/// `ERROR` and no payload.
async fn send_file<W>(
    writer: &mut W,
    ctx: &TransportContext,
    index: usize,
    resume_from: Option<u64>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let Some(asset) = ctx.batch.get(index) else {
        tracing::warn!(error = %Error::InvalidIndex(index), "Rejected request");
        let rejection = if resume_from.is_some() {
            CommandError::InvalidResumeParameters
        } else {
            CommandError::InvalidIndex
        };
        return protocol::write_error(writer, &rejection.to_string()).await;
    };

    let offset = resume_from.unwrap_or(0);
    if offset > asset.byte_size {
        let err = Error::SeekFailure {
            requested: offset,
            reached: asset.byte_size,
        };
        tracing::warn!(index, error = %err, "Resume offset beyond end of file");
        return protocol::write_error(writer, protocol::MSG_SEEK_FAILED).await;
    }

    let mut source = match ctx.catalog.open(asset).await {
        Ok(source) => source,
        Err(e) => {
            let err = Error::SourceUnavailable {
                name: asset.display_name.clone(),
                reason: e.to_string(),
            };
            tracing::warn!(index, error = %err, "Failed to open asset");
            return protocol::write_error(writer, protocol::MSG_CANNOT_OPEN).await;
        }
    };

    if offset > 0 {
        let reached = skip(&mut source, offset).await.unwrap_or(0);
        if reached != offset {
            let err = Error::SeekFailure {
                requested: offset,
                reached,
            };
            tracing::warn!(index, error = %err, "Resume failed");
            return protocol::write_error(writer, protocol::MSG_SEEK_FAILED).await;
        }
    }

    let header = FileHeader {
        size: asset.byte_size,
        offset,
        name: asset.display_name.clone(),
    };
    writer
        .write_all(header.encode(resume_from.is_some()).as_bytes())
        .await?;

    tracing::info!(index, file = %asset.display_name, offset, size = asset.byte_size, "Sending file");
    let mut report = ctx.reporter.begin(index, asset, offset);
    let remaining = copy_exact(&mut source, writer, header.payload_len(), ctx.buffer_size, |n| {
        report.advance(n);
    })
    .await?;
    writer.flush().await?;

    if remaining > 0 {
        report.finish(false);
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!(
                "'{}' ended {remaining} bytes before its declared size",
                asset.display_name
            ),
        )));
    }

    report.finish(true);
    Ok(())
}

/// Discard `offset` bytes, returning how many were actually skipped.
async fn skip(source: &mut AssetReader, offset: u64) -> std::io::Result<u64> {
    let mut limited = (&mut *source).take(offset);
    tokio::io::copy(&mut limited, &mut tokio::io::sink()).await
}

/// Copy up to `len` bytes, returning how many were missing at end of input.
async fn copy_exact<R, W>(
    source: &mut R,
    writer: &mut W,
    len: u64,
    buffer_size: usize,
    mut on_chunk: impl FnMut(u64),
) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut remaining = len;

    while remaining > 0 {
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = source.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        remaining -= n as u64;
        on_chunk(n as u64);
    }

    Ok(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_exact_stops_at_len() {
        let data = vec![7u8; 1000];
        let mut source = &data[..];
        let mut out = Vec::new();
        let mut seen = 0;

        let missing = copy_exact(&mut source, &mut out, 600, 256, |n| seen += n)
            .await
            .unwrap();

        assert_eq!(missing, 0);
        assert_eq!(out.len(), 600);
        assert_eq!(seen, 600);
    }

    #[tokio::test]
    async fn test_copy_exact_reports_short_source() {
        let data = vec![1u8; 100];
        let mut source = &data[..];
        let mut out = Vec::new();

        let missing = copy_exact(&mut source, &mut out, 150, 64, |_| {})
            .await
            .unwrap();

        assert_eq!(missing, 50);
        assert_eq!(out.len(), 100);
    }

    #[tokio::test]
    async fn test_skip_counts_bytes() {
        let mut source: AssetReader = Box::new(&b"0123456789"[..]);
        assert_eq!(skip(&mut source, 4).await.unwrap(), 4);

        let mut rest = String::new();
        source.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "456789");

        let mut short: AssetReader = Box::new(&b"abc"[..]);
        assert_eq!(skip(&mut short, 10).await.unwrap(), 3);
    }
}
