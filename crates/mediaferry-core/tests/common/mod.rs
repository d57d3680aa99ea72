//! Common test utilities for `MediaFerry` integration tests.
//!
//! Servers always bind `127.0.0.1:0`, so tests never race for ports.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use mediaferry_core::asset::{AssetCatalog, AssetReader, TransferBatch, TransferableAsset};
use mediaferry_core::config::Config;
use mediaferry_core::transport::{ServerConfig, TransportKind};

/// In-memory asset catalog.
///
/// Assets can be made unreadable or undeletable to exercise failure paths.
#[derive(Default)]
pub struct MemoryCatalog {
    contents: Mutex<HashMap<String, Vec<u8>>>,
    unreadable: HashSet<String>,
    undeletable: HashSet<String>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `content` under the asset's path.
    pub fn insert(&self, asset: &TransferableAsset, content: Vec<u8>) {
        self.contents
            .lock()
            .unwrap()
            .insert(asset.path.clone(), content);
    }

    /// Make `open` fail for this asset.
    pub fn fail_open(mut self, asset: &TransferableAsset) -> Self {
        self.unreadable.insert(asset.path.clone());
        self
    }

    /// Make `delete` fail for this asset.
    pub fn fail_delete(mut self, asset: &TransferableAsset) -> Self {
        self.undeletable.insert(asset.path.clone());
        self
    }

    /// Whether the asset still exists.
    pub fn contains(&self, asset: &TransferableAsset) -> bool {
        self.contents.lock().unwrap().contains_key(&asset.path)
    }
}

impl AssetCatalog for MemoryCatalog {
    fn open<'a>(&'a self, asset: &'a TransferableAsset) -> BoxFuture<'a, io::Result<AssetReader>> {
        async move {
            if self.unreadable.contains(&asset.path) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
            }
            let content = self
                .contents
                .lock()
                .unwrap()
                .get(&asset.path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such asset"))?;
            Ok(Box::new(io::Cursor::new(content)) as AssetReader)
        }
        .boxed()
    }

    fn delete<'a>(&'a self, asset: &'a TransferableAsset) -> BoxFuture<'a, io::Result<()>> {
        async move {
            if self.undeletable.contains(&asset.path) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
            }
            self.contents.lock().unwrap().remove(&asset.path);
            Ok(())
        }
        .boxed()
    }
}

/// Create a temporary directory, removed when dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// A camera-roll style asset.
pub fn media_asset(id: u64, name: &str, size: u64) -> TransferableAsset {
    let mime = if name.ends_with(".mp4") {
        "video/mp4"
    } else {
        "image/jpeg"
    };
    TransferableAsset::new(
        id,
        format!("/storage/DCIM/Camera/{name}"),
        name,
        size,
        mime,
        1_700_000_000 + i64::try_from(id).unwrap(),
    )
}

/// Build a catalog and batch from `(name, size)` pairs filled with random bytes.
///
/// Returns the batch, the catalog and each asset's content in batch order.
pub fn media_batch(files: &[(&str, usize)]) -> (TransferBatch, MemoryCatalog, Vec<Vec<u8>>) {
    let catalog = MemoryCatalog::new();
    let mut assets = Vec::new();
    let mut contents = Vec::new();

    for (i, (name, size)) in files.iter().enumerate() {
        let asset = media_asset(i as u64 + 1, name, *size as u64);
        let content = random_bytes(*size);
        catalog.insert(&asset, content.clone());
        assets.push(asset);
        contents.push(content);
    }

    (TransferBatch::new(assets), catalog, contents)
}

/// Server settings bound to an ephemeral localhost port.
pub fn local_server_config(kind: TransportKind) -> ServerConfig {
    ServerConfig {
        kind,
        addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        device_name: "Test Phone".to_string(),
        buffer_size: 16 * 1024,
    }
}

/// Configuration with every store under `data_dir` and ephemeral ports.
pub fn test_config(data_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.general.device_name = "Test Phone".to_string();
    config.general.data_dir = Some(data_dir.to_path_buf());
    config.http.port = 0;
    config.http.localhost_only = true;
    config.line.port = 0;
    config.line.localhost_only = true;
    config
}

/// Send one line-protocol command and collect the whole response.
pub async fn line_request(addr: SocketAddr, command: &str) -> Vec<u8> {
    raw_line_request(addr, format!("{command}\n").as_bytes()).await
}

/// Send raw bytes to a line-protocol server and read until it closes.
pub async fn raw_line_request(addr: SocketAddr, bytes: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(bytes).await.expect("write command");
    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .await
        .expect("read response");
    response
}

/// A parsed HTTP/1.1 response.
#[derive(Debug)]
pub struct HttpReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpReply {
    /// First header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Issue a raw HTTP/1.1 request and read until the server closes.
pub async fn http_request(addr: SocketAddr, method: &str, path: &str) -> HttpReply {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let request = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Length: 0\r\n\r\n");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("write request");

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.expect("read response");

    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has a header block");
    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let body = raw[split + 4..].to_vec();

    let mut lines = head.split("\r\n");
    let status = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .expect("status line");
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    HttpReply {
        status,
        headers,
        body,
    }
}
