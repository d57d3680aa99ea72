//! Browser-style HTTP server.
//!
//! | Request | Response |
//! |---------|----------|
//! | `GET /` | HTML listing with download links |
//! | `GET /list` | `{"files":[{index,name,size,type,url}]}` |
//! | `GET /download/{index}` | the asset bytes as an attachment |
//!
//! Every response carries `Connection: close`, so each connection serves
//! exactly one request. Downloads are not range-addressable; an I/O error
//! mid-body aborts the connection.

use std::fmt::Write as _;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tower_http::set_header::SetResponseHeaderLayer;

use super::{FileReport, TransportContext};
use crate::asset::{format_size, TransferableAsset};
use crate::error::Error;

type SharedContext = Arc<TransportContext>;

/// `/list` response body.
#[derive(Debug, Serialize)]
struct ListResponse {
    files: Vec<ListEntry>,
}

#[derive(Debug, Serialize)]
struct ListEntry {
    index: usize,
    name: String,
    size: u64,
    #[serde(rename = "type")]
    kind: &'static str,
    url: String,
}

/// Plain-text error responses.
#[derive(Debug)]
enum HttpError {
    BadRequest,
    NotFound(&'static str),
    Internal(&'static str),
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest => (StatusCode::BAD_REQUEST, "Bad Request"),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            message,
        )
            .into_response()
    }
}

pub(crate) async fn serve(listener: TcpListener, ctx: SharedContext) {
    let shutdown = ctx.shutdown.clone();
    let app = router(ctx);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::warn!(error = %e, "HTTP server stopped with error");
    }
}

fn router(ctx: SharedContext) -> Router {
    Router::new()
        .route("/", get(index_page).fallback(bad_request))
        .route("/list", get(list_files).fallback(bad_request))
        .route("/download/{index}", get(download).fallback(bad_request))
        .fallback(fallback)
        .layer(SetResponseHeaderLayer::overriding(
            header::CONNECTION,
            HeaderValue::from_static("close"),
        ))
        .with_state(ctx)
}

async fn bad_request() -> HttpError {
    HttpError::BadRequest
}

async fn fallback(method: Method) -> HttpError {
    if method == Method::GET || method == Method::HEAD {
        HttpError::NotFound("Page not found")
    } else {
        HttpError::BadRequest
    }
}

async fn list_files(State(ctx): State<SharedContext>) -> Json<ListResponse> {
    let files = ctx
        .batch
        .iter()
        .enumerate()
        .map(|(index, asset)| ListEntry {
            index,
            name: asset.display_name.clone(),
            size: asset.byte_size,
            kind: asset.kind().wire_name(),
            url: format!("/download/{index}"),
        })
        .collect();
    Json(ListResponse { files })
}

async fn download(
    State(ctx): State<SharedContext>,
    method: Method,
    Path(raw_index): Path<String>,
) -> Result<Response, HttpError> {
    let Some((index, asset)) = raw_index
        .parse::<usize>()
        .ok()
        .and_then(|i| ctx.batch.get(i).map(|asset| (i, asset)))
    else {
        tracing::warn!(index = %raw_index, "Download of unknown index");
        return Err(HttpError::NotFound("File not found"));
    };

    // headers only, nothing is read or reported
    if method == Method::HEAD {
        return download_response(asset, Body::empty()).map_err(|e| {
            tracing::warn!(index, error = %e, "Failed to build download response");
            HttpError::Internal("Cannot open file")
        });
    }

    let source = ctx.catalog.open(asset).await.map_err(|e| {
        let err = Error::SourceUnavailable {
            name: asset.display_name.clone(),
            reason: e.to_string(),
        };
        tracing::warn!(index, error = %err, "Failed to open asset");
        HttpError::Internal("Cannot open file")
    })?;

    tracing::info!(index, file = %asset.display_name, size = asset.byte_size, "Serving download");
    let report = ctx.reporter.begin(index, asset, 0);
    let stream = ReportingStream {
        inner: ReaderStream::with_capacity(source, crate::HTTP_CHUNK_SIZE),
        report: Some(report),
        remaining: asset.byte_size,
    }
    .take_until(ctx.shutdown.clone().cancelled_owned());

    download_response(asset, Body::from_stream(stream)).map_err(|e| {
        tracing::warn!(index, error = %e, "Failed to build download response");
        HttpError::Internal("Cannot open file")
    })
}

fn download_response(asset: &TransferableAsset, body: Body) -> axum::http::Result<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, asset.mime_type.as_str())
        .header(header::CONTENT_LENGTH, asset.byte_size)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&asset.display_name),
        )
        .body(body)
}

/// Body stream that reports bytes to a [`FileReport`] and stops at the
/// declared size.
struct ReportingStream<S> {
    inner: S,
    report: Option<FileReport>,
    remaining: u64,
}

impl<S> Stream for ReportingStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.remaining == 0 {
            if let Some(report) = this.report.take() {
                report.finish(true);
            }
            return Poll::Ready(None);
        }

        match ready!(this.inner.poll_next_unpin(cx)) {
            Some(Ok(mut chunk)) => {
                let len = (chunk.len() as u64).min(this.remaining);
                chunk.truncate(len as usize);
                this.remaining -= len;
                if let Some(report) = this.report.as_mut() {
                    report.advance(len);
                }
                // hyper may drop the body once Content-Length bytes are out
                if this.remaining == 0 {
                    if let Some(report) = this.report.take() {
                        report.finish(true);
                    }
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => {
                this.report.take();
                Poll::Ready(Some(Err(e)))
            }
            None => match this.report.take() {
                Some(report) => {
                    report.finish(false);
                    Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "asset ended before its declared size",
                    ))))
                }
                None => Poll::Ready(None),
            },
        }
    }
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 name.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if fallback == name {
        return format!("attachment; filename=\"{name}\"");
    }

    let mut encoded = String::new();
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

async fn index_page(State(ctx): State<SharedContext>) -> Html<String> {
    let mut items = String::new();
    for (index, asset) in ctx.batch.iter().enumerate() {
        let _ = write!(
            items,
            r#"<li class="item"><span class="idx">#{index}</span><div class="info"><div class="name">{name}</div><div class="meta">{meta}</div></div><a class="dl" href="/download/{index}" download>Download</a></li>"#,
            name = escape_html(&asset.display_name),
            meta = escape_html(&item_meta(asset)),
        );
    }

    let count = ctx.batch.len();
    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{device} - MediaFerry</title>
<style>
body {{ font-family: system-ui, sans-serif; margin: 0; background: #f4f5f7; color: #222; }}
header {{ background: #1f6feb; color: #fff; padding: 16px 24px; }}
header h1 {{ margin: 0; font-size: 1.4em; }}
main {{ max-width: 880px; margin: 0 auto; padding: 16px; }}
ul {{ list-style: none; padding: 0; }}
.item {{ display: flex; align-items: center; gap: 12px; background: #fff; border-radius: 8px; padding: 12px; margin-bottom: 8px; }}
.idx {{ color: #888; min-width: 3em; }}
.info {{ flex: 1; min-width: 0; }}
.name {{ font-weight: 600; overflow-wrap: anywhere; }}
.meta {{ color: #666; font-size: 0.9em; }}
.dl, button {{ background: #1f6feb; color: #fff; border: 0; border-radius: 6px; padding: 8px 14px; text-decoration: none; cursor: pointer; }}
</style>
</head>
<body>
<header><h1>{device}</h1><div>{count} file(s) ready, {total}</div></header>
<main>
<button onclick="downloadAll()">Download all</button>
<ul>{items}</ul>
</main>
<script>
async function downloadAll() {{
  const links = Array.from(document.querySelectorAll('a.dl'));
  for (const link of links) {{
    link.click();
    await new Promise(r => setTimeout(r, 800));
  }}
}}
</script>
</body>
</html>
"#,
        device = escape_html(&ctx.device_name),
        total = format_size(ctx.batch.total_bytes()),
    ))
}

fn item_meta(asset: &TransferableAsset) -> String {
    let mut parts = vec![asset.kind().to_string(), format_size(asset.byte_size)];
    if let Some(resolution) = asset.resolution() {
        parts.push(resolution);
    }
    if let Some(duration) = asset.formatted_duration() {
        parts.push(duration);
    }
    if let Some(modified) = chrono::DateTime::from_timestamp(asset.modified_at, 0) {
        parts.push(modified.format("%Y-%m-%d %H:%M").to_string());
    }
    parts.join(" · ")
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
