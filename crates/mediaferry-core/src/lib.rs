//! # MediaFerry Core Library
//!
//! `mediaferry-core` is the transfer engine behind MediaFerry: it moves a
//! selected batch of photos and videos off a device onto a companion machine.
//!
//! ## Features
//!
//! - **Two transports**: a browser-friendly HTTP server and a compact
//!   line protocol for a tethered companion client
//! - **Resumable transfers**: per-file byte offsets are persisted so an
//!   interrupted batch can continue with `RESUME`
//! - **Incremental mode**: a history ledger skips assets moved before
//! - **Live progress**: throughput and ETA shared by both transports
//!
//! ## Modules
//!
//! - [`asset`] - Transferable assets, batches and the asset catalog seam
//! - [`client`] - Companion client for the line protocol
//! - [`config`] - Configuration management
//! - [`history`] - Ledger of previously transferred assets
//! - [`progress`] - Progress, throughput and ETA tracking
//! - [`protocol`] - Line protocol commands and framing
//! - [`session`] - Persisted state of a resumable multi-file job
//! - [`transfer`] - The transfer session orchestrator
//! - [`transport`] - HTTP and line-protocol servers
//!
//! ## Example
//!
//! ```rust,ignore
//! use mediaferry_core::transfer::{Eligibility, TransferSession};
//! use mediaferry_core::transport::TransportKind;
//!
//! let mut session = TransferSession::open(config, catalog);
//! if let Eligibility::Ready(batch) = session.compute_eligible_assets(&selected, true) {
//!     let started = session.start(TransportKind::Line, batch).await?;
//!     println!("Serving on {}", started.local_addr);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod asset;
pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod progress;
pub mod protocol;
pub mod session;
pub mod transfer;
pub mod transport;

mod persist;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default port of the HTTP transport
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default port of the line-protocol transport
pub const DEFAULT_LINE_PORT: u16 = 12345;

/// Buffer size used by the line-protocol transport (64 KiB)
pub const LINE_BUFFER_SIZE: usize = 64 * 1024;

/// Chunk size of HTTP download bodies (8 KiB)
pub const HTTP_CHUNK_SIZE: usize = 8 * 1024;

/// Number of finished sessions kept in the session log
pub const DEFAULT_MAX_SESSIONS: usize = 50;

/// Bytes between two persisted resume checkpoints (8 MiB)
pub const DEFAULT_CHECKPOINT_BYTES: u64 = 8 * 1024 * 1024;

/// Name of the history ledger file inside the data directory
pub const HISTORY_FILE_NAME: &str = "history.json";

/// Name of the session state file inside the data directory
pub const SESSION_FILE_NAME: &str = "session.json";

/// Platform data directory (`~/.local/share/mediaferry` on Linux).
#[must_use]
pub fn default_data_dir() -> std::path::PathBuf {
    directories::ProjectDirs::from("com", "mediaferry", "MediaFerry").map_or_else(
        || std::path::PathBuf::from(".mediaferry"),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}
