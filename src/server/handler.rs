// Axum request handler: serves blob handles, host messages and intercepted resource requests.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::cache::address::CanonicalAddress;
use crate::config::ResolvedConfig;
use crate::engine::handles::HandleRegistry;
use crate::engine::session::{HostMessage, SessionManager};
use crate::resolve::resolver::{Resolution, ResolveSource, ResourceResolver};

/// Response header naming where an intercepted resource came from.
pub const RESOLVED_FROM_HEADER: &str = "x-resolved-from";

/// Route the rendering surface posts host messages to.
pub const SESSION_MESSAGE_ROUTE: &str = "/_engine/session/message";

#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<ResolvedConfig>,
    pub handles: Arc<HandleRegistry>,
    pub resolver: Arc<ResourceResolver>,
    pub sessions: Arc<SessionManager>,
}

pub struct ModuleServer {
    addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ModuleServer {
    /// Serve on an already bound listener, returning a handle.
    pub async fn start(listener: TcpListener, state: ServerState) -> Result<Self> {
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let app = Router::new()
            .route("/_engine/blob/{id}", get(blob_handler))
            .route(SESSION_MESSAGE_ROUTE, post(message_handler))
            .fallback(intercept_handler)
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        info!("module server listening on {}", addr);

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://{addr}`, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Shutdown the server gracefully.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ParsedRange {
    StartEnd {
        start: u64,
        end_inclusive: Option<u64>,
    },
    Suffix {
        len: u64,
    },
}

impl ParsedRange {
    /// `[start, end)` within a body of `total` bytes, or `None` if unsatisfiable.
    fn bounds(&self, total: u64) -> Option<(u64, u64)> {
        match *self {
            Self::StartEnd {
                start,
                end_inclusive,
            } => {
                let end = end_inclusive.map_or(total, |e| e.saturating_add(1).min(total));
                (start < total && end > start).then_some((start, end))
            }
            Self::Suffix { len } => (total > 0).then(|| (total.saturating_sub(len), total)),
        }
    }
}

/// Parse a single `bytes=` range (`start-end`, `start-` or `-suffix`).
fn parse_range_header(value: &str) -> Option<ParsedRange> {
    let value = value.trim();
    let rest = value.strip_prefix("bytes=")?;
    let mut parts = rest.splitn(2, '-');
    let start_str = parts.next()?.trim();
    let end_str = parts.next()?.trim();

    if start_str.is_empty() {
        let len: u64 = end_str.parse().ok()?;
        if len == 0 {
            return None;
        }
        Some(ParsedRange::Suffix { len })
    } else {
        let start: u64 = start_str.parse().ok()?;
        let end_inclusive = if end_str.is_empty() {
            None
        } else {
            Some(end_str.parse::<u64>().ok()?)
        };
        Some(ParsedRange::StartEnd {
            start,
            end_inclusive,
        })
    }
}

/// Full or partial body with its MIME type. Media entries are seeked with Range.
fn content_response(headers: &HeaderMap, content: Bytes, mime_type: &str, origin: &str) -> Response {
    let total = content.len() as u64;
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header);

    let Some(range) = range else {
        return (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, mime_type.to_string()),
                (header::ACCEPT_RANGES, "bytes".to_string()),
                (header::HeaderName::from_static(RESOLVED_FROM_HEADER), origin.to_string()),
            ],
            content,
        )
            .into_response();
    };

    match range.bounds(total) {
        Some((start, end)) => {
            // Content-Range end is inclusive in HTTP.
            let content_range = format!("bytes {}-{}/{}", start, end - 1, total);
            (
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_TYPE, mime_type.to_string()),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                    (header::CONTENT_RANGE, content_range),
                    (header::HeaderName::from_static(RESOLVED_FROM_HEADER), origin.to_string()),
                ],
                content.slice(start as usize..end as usize),
            )
                .into_response()
        }
        None => (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{}", total))],
            "range not satisfiable",
        )
            .into_response(),
    }
}

/// GET /_engine/blob/{id}: content of a live handle.
async fn blob_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    match state.handles.resolve(&id) {
        Some(blob) => content_response(&headers, blob.content, &blob.mime_type, "handle"),
        None => {
            debug!("blob request for revoked or unknown handle {}", id);
            (StatusCode::NOT_FOUND, "handle not found").into_response()
        }
    }
}

/// POST /_engine/session/message: messages from the presented module.
async fn message_handler(
    State(state): State<ServerState>,
    Json(message): Json<HostMessage>,
) -> StatusCode {
    if let Some(id) = state.sessions.handle_message(&message) {
        debug!("session {} closed by host message", id);
    }
    StatusCode::NO_CONTENT
}

/// Every other request: cache-first resolution within the configured scope.
async fn intercept_handler(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    if !uri.path().starts_with(&state.config.scope) {
        return (StatusCode::NOT_FOUND, "outside scope").into_response();
    }

    let address = match CanonicalAddress::for_request(&state.config.origin, uri.path()) {
        Ok(address) => address,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match state.resolver.resolve(&address).await {
        Resolution::Found { resource, source } => {
            let origin = match source {
                ResolveSource::Cache => "cache",
                ResolveSource::BasenameFallback => "basename",
                ResolveSource::Network => "network",
            };
            debug!("intercept {} -> {} ({})", uri.path(), resource.address, origin);
            content_response(&headers, resource.content, &resource.mime_type, origin)
        }
        Resolution::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
        Resolution::Upstream(status) => StatusCode::from_u16(status)
            .unwrap_or(StatusCode::BAD_GATEWAY)
            .into_response(),
        Resolution::Unreachable(reason) => {
            warn!("intercept {} failed: {}", uri.path(), reason);
            (StatusCode::REQUEST_TIMEOUT, "Network error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Seeking inside a cached video entry of this length.
    const CLIP_LEN: u64 = 48_000;

    #[test]
    fn test_video_seek_ranges() {
        let first_chunk = parse_range_header("bytes=0-16383").unwrap();
        assert_eq!(first_chunk.bounds(CLIP_LEN), Some((0, 16_384)));

        let resume = parse_range_header("bytes=32000-").unwrap();
        assert_eq!(resume.bounds(CLIP_LEN), Some((32_000, CLIP_LEN)));

        let tail = parse_range_header("bytes=-8000").unwrap();
        assert_eq!(tail.bounds(CLIP_LEN), Some((40_000, CLIP_LEN)));
    }

    #[test]
    fn test_range_past_end_of_entry() {
        let past = parse_range_header("bytes=48000-").unwrap();
        assert_eq!(past.bounds(CLIP_LEN), None);

        let overlong = parse_range_header("bytes=47990-99999").unwrap();
        assert_eq!(overlong.bounds(CLIP_LEN), Some((47_990, CLIP_LEN)));

        let tail_of_empty = parse_range_header("bytes=-10").unwrap();
        assert_eq!(tail_of_empty.bounds(0), None);
        assert_eq!(tail_of_empty.bounds(4), Some((0, 4)));
    }

    #[test]
    fn test_malformed_range_is_ignored() {
        for header in ["invalid", "bytes=abc-def", "items=0-10", "bytes="] {
            assert_eq!(parse_range_header(header), None, "{header}");
        }
    }
}
