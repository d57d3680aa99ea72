//! Wire servers for a [`TransferBatch`].
//!
//! Two interchangeable transports serve the same batch:
//!
//! - [`http`]: listing page, JSON list and full-file downloads for
//!   browser-like clients, one request per connection
//! - [`line`]: `LIST`/`COUNT`/`GET`/`RESUME` for the companion client,
//!   with byte-offset resume
//!
//! Both run one accept loop plus one task per connection and report bytes
//! through the same [`TransferReporter`], so progress and persisted state
//! are transport-agnostic. A [`ServerHandle`] stops the loop and every
//! in-flight connection.

pub mod http;
pub mod line;
mod report;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::asset::{AssetCatalog, TransferBatch};
use crate::config::{bind_addr, Config};
use crate::error::{Error, Result};

pub use report::{FileReport, TransferReporter};

/// Which wire server to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Browser-style HTTP server
    Http,
    /// Line-protocol server for the companion client
    Line,
}

impl TransportKind {
    /// Whether sessions on this transport persist resume state.
    pub const fn is_resumable(self) -> bool {
        matches!(self, Self::Line)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Line => write!(f, "line"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "web" => Ok(Self::Http),
            "line" | "adb" | "tcp" => Ok(Self::Line),
            other => Err(Error::ConfigError(format!("unknown transport '{other}'"))),
        }
    }
}

/// Settings for one server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Transport to run
    pub kind: TransportKind,
    /// Address to listen on (port 0 picks a free port)
    pub addr: SocketAddr,
    /// Name shown on the HTML listing page
    pub device_name: String,
    /// Copy buffer size of the line transport
    pub buffer_size: usize,
}

impl ServerConfig {
    /// Server settings for `kind` taken from the configuration.
    pub fn from_config(kind: TransportKind, config: &Config) -> Self {
        let addr = match kind {
            TransportKind::Http => bind_addr(config.http.port, config.http.localhost_only),
            TransportKind::Line => bind_addr(config.line.port, config.line.localhost_only),
        };
        Self {
            kind,
            addr,
            device_name: config.general.device_name.clone(),
            buffer_size: config.line.buffer_size.max(1024),
        }
    }

    /// Override the listening port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }
}

/// State shared by the accept loop and every connection task.
pub(crate) struct TransportContext {
    pub batch: TransferBatch,
    pub catalog: Arc<dyn AssetCatalog>,
    pub reporter: TransferReporter,
    pub device_name: String,
    pub buffer_size: usize,
    pub shutdown: CancellationToken,
}

/// Start a server for `batch`.
///
/// The listening socket is bound before this returns, so a busy port
/// surfaces here as [`Error::AddressInUse`].
pub async fn start_server(
    config: &ServerConfig,
    batch: TransferBatch,
    catalog: Arc<dyn AssetCatalog>,
    reporter: TransferReporter,
) -> Result<ServerHandle> {
    Ok(BoundServer::bind(config).await?.serve(batch, catalog, reporter))
}

/// A bound listening socket with no accept loop yet.
///
/// Dropping it releases the port.
#[derive(Debug)]
pub struct BoundServer {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BoundServer {
    /// Bind the socket described by `config`.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let listener = bind(config.addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            config: config.clone(),
            listener,
            local_addr,
        })
    }

    /// Address actually bound.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawn the accept loop serving `batch`.
    pub fn serve(
        self,
        batch: TransferBatch,
        catalog: Arc<dyn AssetCatalog>,
        reporter: TransferReporter,
    ) -> ServerHandle {
        let Self {
            config,
            listener,
            local_addr,
        } = self;
        let shutdown = CancellationToken::new();

        let ctx = Arc::new(TransportContext {
            batch,
            catalog,
            reporter,
            device_name: config.device_name,
            buffer_size: config.buffer_size,
            shutdown: shutdown.clone(),
        });

        let task = match config.kind {
            TransportKind::Http => tokio::spawn(http::serve(listener, ctx)),
            TransportKind::Line => tokio::spawn(line::serve(listener, ctx)),
        };

        tracing::info!(transport = %config.kind, addr = %local_addr, "Server listening");

        ServerHandle {
            kind: config.kind,
            local_addr,
            shutdown,
            task,
        }
    }
}

/// A running server.
#[derive(Debug)]
pub struct ServerHandle {
    kind: TransportKind,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Transport being served.
    pub const fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Address actually bound.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, abort in-flight transfers and release the port.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.task.abort();
        match self.task.await {
            Err(e) if e.is_panic() => {
                tracing::warn!(transport = %self.kind, "Server task panicked");
            }
            _ => {}
        }
        tracing::info!(transport = %self.kind, addr = %self.local_addr, "Server stopped");
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|e| {
        if e.kind() == io::ErrorKind::AddrInUse {
            Error::AddressInUse { port: addr.port() }
        } else {
            Error::Io(e)
        }
    })
}

/// Tune an accepted socket for bulk sending.
fn configure_stream(stream: &TcpStream, send_buffer: usize) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    let socket_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));
    if let Err(e) = socket_ref.set_tcp_keepalive(&keepalive) {
        tracing::debug!(error = %e, "Failed to enable TCP keep-alive");
    }
    if let Err(e) = socket_ref.set_send_buffer_size(send_buffer) {
        tracing::debug!(error = %e, "Failed to size send buffer");
    }
}
