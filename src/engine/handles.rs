// Transient blob handles: in-memory resources addressable by URL until revoked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::RwLock;

/// Route prefix the server answers handle requests on.
pub const BLOB_ROUTE_PREFIX: &str = "/_engine/blob/";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobHandle {
    id: String,
    url: String,
}

impl BlobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Clone)]
pub struct BlobContent {
    pub content: Bytes,
    pub mime_type: String,
}

/// Process-wide table of live handles.
///
/// Handles are created and revoked by their owning rendering session;
/// the server only resolves them.
pub struct HandleRegistry {
    base_url: String,
    nonce: u64,
    next_id: AtomicU64,
    entries: RwLock<HashMap<String, BlobContent>>,
}

impl HandleRegistry {
    /// `base_url` is the server root handle URLs are built on, without a trailing `/`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            nonce: nanos ^ u64::from(std::process::id()).rotate_left(32),
            next_id: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, content: Bytes, mime_type: &str) -> BlobHandle {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = format!("{:016x}-{:x}", self.nonce, n);
        self.entries.write().insert(
            id.clone(),
            BlobContent {
                content,
                mime_type: mime_type.to_string(),
            },
        );
        BlobHandle {
            url: format!("{}{}{}", self.base_url, BLOB_ROUTE_PREFIX, id),
            id,
        }
    }

    /// Returns `false` if the handle was already revoked.
    pub fn revoke(&self, handle: &BlobHandle) -> bool {
        self.entries.write().remove(&handle.id).is_some()
    }

    pub fn resolve(&self, id: &str) -> Option<BlobContent> {
        self.entries.read().get(id).cloned()
    }

    pub fn is_live(&self, handle: &BlobHandle) -> bool {
        self.entries.read().contains_key(&handle.id)
    }

    pub fn live_count(&self) -> usize {
        self.entries.read().len()
    }
}
