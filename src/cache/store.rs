// Resource stores: a durable directory-backed cache and an in-memory one.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::address::CanonicalAddress;
use crate::error::{EngineError, Result};

/// A stored response: content plus its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResource {
    pub address: CanonicalAddress,
    pub mime_type: String,
    pub content: Bytes,
}

/// Origin-scoped key/value store of resources.
///
/// `get` returns promptly on a miss so callers can fall back to the network.
/// Read errors are reported as misses.
#[async_trait]
pub trait ResourceCache: Send + Sync {
    /// Namespace name, e.g. `drivesafe-modules-v2`.
    fn name(&self) -> &str;

    /// Store `content` under `address`, replacing any previous entry.
    async fn put(&self, address: &CanonicalAddress, content: Bytes, mime_type: &str) -> Result<()>;

    async fn get(&self, address: &CanonicalAddress) -> Option<CachedResource>;

    /// Loose lookup by the last path segment only.
    ///
    /// Entries from different modules that share a file name collide here;
    /// the most recently written one wins, also across reopens.
    async fn get_by_basename(&self, basename: &str) -> Option<CachedResource>;

    /// Addresses starting with `prefix`, in sorted order.
    async fn keys_with_prefix(&self, prefix: &str) -> Vec<CanonicalAddress>;

    async fn len(&self) -> usize;
}

#[derive(Default)]
struct CacheIndex {
    by_address: BTreeMap<CanonicalAddress, EntryMeta>,
    by_basename: HashMap<String, CanonicalAddress>,
}

impl CacheIndex {
    fn insert(&mut self, address: CanonicalAddress, meta: EntryMeta) {
        let newer = self
            .by_basename
            .get(address.basename())
            .and_then(|holder| self.by_address.get(holder))
            .map_or(true, |current| meta.seq >= current.seq);
        if newer {
            self.by_basename
                .insert(address.basename().to_string(), address.clone());
        }
        self.by_address.insert(address, meta);
    }

    fn max_seq(&self) -> u64 {
        self.by_address.values().map(|m| m.seq).max().unwrap_or(0)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<CanonicalAddress> {
        self.by_address
            .keys()
            .filter(|a| a.as_str().starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    address: String,
    mime_type: String,
    len: u64,
    /// Write order within the namespace.
    #[serde(default)]
    seq: u64,
}

/// Durable store: one directory per versioned namespace.
///
/// Each entry is a content file named after the SHA-256 of its address
/// plus a JSON sidecar. The sidecar is written last, so an entry without
/// one is an interrupted write and is ignored on open.
pub struct DiskResourceCache {
    name: String,
    dir: PathBuf,
    index: RwLock<CacheIndex>,
    tmp_counter: AtomicU64,
    write_seq: AtomicU64,
}

impl DiskResourceCache {
    /// Open (or create) namespace `name` under `root`.
    ///
    /// Directories and files belonging to other versions of the same
    /// namespace prefix (`{prefix}-v{n}`, `{prefix}-v{n}.*`) are deleted.
    pub fn open(root: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(root)?;
        purge_stale_versions(root, name);

        let dir = root.join(name);
        fs::create_dir_all(&dir)?;

        let mut index = CacheIndex::default();
        for item in fs::read_dir(&dir)? {
            let path = item?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => {}
                Some(ext) if ext.starts_with("tmp-") => {
                    let _ = fs::remove_file(&path);
                    continue;
                }
                _ => continue,
            }
            let meta: EntryMeta = match fs::read(&path)
                .map_err(EngineError::from)
                .and_then(|raw| {
                    serde_json::from_slice(&raw).map_err(|e| EngineError::Io(e.to_string()))
                }) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("skipping unreadable cache metadata {:?}: {}", path, e);
                    continue;
                }
            };
            if !path.with_extension("bin").exists() {
                warn!("cache metadata without content: {:?}", path);
                continue;
            }
            match CanonicalAddress::parse(&meta.address) {
                Ok(address) => index.insert(address, meta),
                Err(e) => warn!("skipping cache entry with bad address: {}", e),
            }
        }

        info!(
            "cache {} opened at {:?} with {} entries",
            name,
            dir,
            index.by_address.len()
        );

        let write_seq = AtomicU64::new(index.max_seq() + 1);
        Ok(Self {
            name: name.to_string(),
            dir,
            index: RwLock::new(index),
            tmp_counter: AtomicU64::new(0),
            write_seq,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn content_path(&self, address: &CanonicalAddress) -> PathBuf {
        let key = hex::encode(Sha256::digest(address.as_str().as_bytes()));
        self.dir.join(format!("{key}.bin"))
    }

    async fn write_atomic(&self, target: &Path, data: &[u8]) -> std::io::Result<()> {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = target.with_extension(format!("tmp-{}-{}", std::process::id(), n));
        if let Err(e) = tokio::fs::write(&tmp, data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        tokio::fs::rename(&tmp, target).await
    }
}

#[async_trait]
impl ResourceCache for DiskResourceCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, address: &CanonicalAddress, content: Bytes, mime_type: &str) -> Result<()> {
        let content_path = self.content_path(address);
        let meta = EntryMeta {
            address: address.to_string(),
            mime_type: mime_type.to_string(),
            len: content.len() as u64,
            seq: self.write_seq.fetch_add(1, Ordering::Relaxed),
        };
        let meta_json =
            serde_json::to_vec(&meta).map_err(|e| EngineError::cache_write(address.as_str(), e))?;

        self.write_atomic(&content_path, &content)
            .await
            .map_err(|e| EngineError::cache_write(address.as_str(), e))?;
        self.write_atomic(&content_path.with_extension("json"), &meta_json)
            .await
            .map_err(|e| EngineError::cache_write(address.as_str(), e))?;

        self.index.write().insert(address.clone(), meta);
        debug!("cache {} put {} ({} bytes)", self.name, address, content.len());
        Ok(())
    }

    async fn get(&self, address: &CanonicalAddress) -> Option<CachedResource> {
        let meta = self.index.read().by_address.get(address).cloned()?;
        match tokio::fs::read(self.content_path(address)).await {
            Ok(data) => Some(CachedResource {
                address: address.clone(),
                mime_type: meta.mime_type,
                content: Bytes::from(data),
            }),
            Err(e) => {
                warn!("cache {} read failed for {}: {}", self.name, address, e);
                None
            }
        }
    }

    async fn get_by_basename(&self, basename: &str) -> Option<CachedResource> {
        let address = self.index.read().by_basename.get(basename).cloned()?;
        self.get(&address).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Vec<CanonicalAddress> {
        self.index.read().keys_with_prefix(prefix)
    }

    async fn len(&self) -> usize {
        self.index.read().by_address.len()
    }
}

/// Remove siblings that belong to another version of `name`'s prefix:
/// `{prefix}-v{n}` directories and `{prefix}-v{n}.*` files.
fn purge_stale_versions(root: &Path, name: &str) {
    let Some((prefix, version)) = name.rsplit_once("-v") else {
        return;
    };
    if version.is_empty() || !version.chars().all(|c| c.is_ascii_digit()) {
        return;
    }
    let Ok(items) = fs::read_dir(root) else {
        return;
    };
    for item in items.flatten() {
        let file_name = item.file_name();
        let Some(other) = file_name.to_str() else {
            continue;
        };
        let stale = other
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix("-v"))
            .map(|rest| rest.split_once('.').map_or(rest, |(v, _)| v))
            .is_some_and(|v| {
                v != version && !v.is_empty() && v.chars().all(|c| c.is_ascii_digit())
            });
        if !stale {
            continue;
        }
        let path = item.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removed {
            Ok(()) => info!("purged stale cache namespace item {}", other),
            Err(e) => warn!("failed to purge stale cache namespace item {}: {}", other, e),
        }
    }
}

/// Non-durable store with the same semantics, for tests and ephemeral hosts.
pub struct MemoryResourceCache {
    name: String,
    index: RwLock<CacheIndex>,
    contents: RwLock<HashMap<CanonicalAddress, Bytes>>,
    write_seq: AtomicU64,
}

impl MemoryResourceCache {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: RwLock::new(CacheIndex::default()),
            contents: RwLock::new(HashMap::new()),
            write_seq: AtomicU64::new(1),
        }
    }

    /// Every stored entry in address order.
    pub fn snapshot(&self) -> Vec<CachedResource> {
        let index = self.index.read();
        let contents = self.contents.read();
        index
            .by_address
            .iter()
            .filter_map(|(address, meta)| {
                contents.get(address).map(|content| CachedResource {
                    address: address.clone(),
                    mime_type: meta.mime_type.clone(),
                    content: content.clone(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl ResourceCache for MemoryResourceCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, address: &CanonicalAddress, content: Bytes, mime_type: &str) -> Result<()> {
        let meta = EntryMeta {
            address: address.to_string(),
            mime_type: mime_type.to_string(),
            len: content.len() as u64,
            seq: self.write_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.contents.write().insert(address.clone(), content);
        self.index.write().insert(address.clone(), meta);
        Ok(())
    }

    async fn get(&self, address: &CanonicalAddress) -> Option<CachedResource> {
        let mime_type = self.index.read().by_address.get(address)?.mime_type.clone();
        let content = self.contents.read().get(address)?.clone();
        Some(CachedResource {
            address: address.clone(),
            mime_type,
            content,
        })
    }

    async fn get_by_basename(&self, basename: &str) -> Option<CachedResource> {
        let address = self.index.read().by_basename.get(basename).cloned()?;
        self.get(&address).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Vec<CanonicalAddress> {
        self.index.read().keys_with_prefix(prefix)
    }

    async fn len(&self) -> usize {
        self.index.read().by_address.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> CanonicalAddress {
        CanonicalAddress::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_memory_put_get_and_prefix() {
        let cache = MemoryResourceCache::new("mem");
        let a = addr("http://localhost/intro/story.html");
        let b = addr("http://localhost/intro/img/m1.png");
        let c = addr("http://localhost/m1/story.html");
        for (address, mime) in [(&a, "text/html"), (&b, "image/png"), (&c, "text/html")] {
            cache
                .put(address, Bytes::from(address.to_string()), mime)
                .await
                .unwrap();
        }

        let hit = cache.get(&b).await.unwrap();
        assert_eq!(hit.mime_type, "image/png");
        assert_eq!(hit.content, Bytes::from(b.to_string()));

        assert!(cache.get(&addr("http://localhost/intro/none.js")).await.is_none());
        assert_eq!(
            cache.keys_with_prefix("http://localhost/intro/").await,
            vec![b.clone(), a.clone()]
        );
        assert_eq!(cache.len().await, 3);
    }

    #[tokio::test]
    async fn test_basename_fallback_prefers_latest_write() {
        let cache = MemoryResourceCache::new("mem");
        let first = addr("http://localhost/m1/story.html");
        let second = addr("http://localhost/m2/story.html");
        cache.put(&first, Bytes::from_static(b"one"), "text/html").await.unwrap();
        cache.put(&second, Bytes::from_static(b"two"), "text/html").await.unwrap();

        let loose = cache.get_by_basename("story.html").await.unwrap();
        assert_eq!(loose.address, second);
        assert!(cache.get_by_basename("missing.png").await.is_none());
    }
}
