use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::rewrite::{rewrite_references, ReferenceMap};
use crate::cache::address::{percent_decode, CanonicalAddress, ModuleNamespace};
use crate::cache::mime::mime_for_path;
use crate::cache::store::{CachedResource, ResourceCache};
use crate::config::ResolvedConfig;
use crate::engine::context::EngineContext;
use crate::engine::handles::BlobHandle;
use crate::engine::session::RenderingSession;
use crate::error::{EngineError, Result};
use crate::source::traits::RemoteSource;

/// Where a resolved resource came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveSource {
    Cache,
    /// Matched on file name only, possibly from another module.
    BasenameFallback,
    Network,
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Found {
        resource: CachedResource,
        source: ResolveSource,
    },
    /// Not cached and no network location to try.
    NotFound,
    /// The network fallback answered with a non-200 status.
    Upstream(u16),
    /// The network fallback failed before a response arrived.
    Unreachable(String),
}

/// Answers resource requests from the caches, then the network.
pub struct ResourceResolver {
    config: Arc<ResolvedConfig>,
    modules: Arc<dyn ResourceCache>,
    statics: Arc<dyn ResourceCache>,
    source: Arc<dyn RemoteSource>,
}

impl ResourceResolver {
    pub fn new(ctx: &EngineContext) -> Self {
        Self {
            config: ctx.config.clone(),
            modules: ctx.modules.clone(),
            statics: ctx.statics.clone(),
            source: ctx.source.clone(),
        }
    }

    pub async fn resolve(&self, address: &CanonicalAddress) -> Resolution {
        let is_static = self.config.is_static_asset(address.as_str());
        let cache = if is_static { &self.statics } else { &self.modules };

        if let Some(resource) = cache.get(address).await {
            return Resolution::Found {
                resource,
                source: ResolveSource::Cache,
            };
        }

        if !is_static && self.is_local(address) && !address.basename().is_empty() {
            if let Some(resource) = self.modules.get_by_basename(address.basename()).await {
                debug!(
                    "basename fallback for {} -> {}",
                    address, resource.address
                );
                return Resolution::Found {
                    resource,
                    source: ResolveSource::BasenameFallback,
                };
            }
        }

        let Some(url) = self.network_url(address) else {
            debug!("cache miss with no upstream: {}", address);
            return Resolution::NotFound;
        };

        match self.source.get(&url).await {
            Ok(resp) if resp.is_ok() => {
                let mime_type = resp
                    .content_type
                    .clone()
                    .unwrap_or_else(|| mime_for_path(address.as_str()).to_string());
                if let Err(e) = cache.put(address, resp.body.clone(), &mime_type).await {
                    warn!("failed to cache network response for {}: {}", address, e);
                }
                Resolution::Found {
                    resource: CachedResource {
                        address: address.clone(),
                        mime_type,
                        content: resp.body,
                    },
                    source: ResolveSource::Network,
                }
            }
            Ok(resp) => {
                debug!("upstream {} answered {}", url, resp.status);
                Resolution::Upstream(resp.status)
            }
            Err(e) => {
                warn!("network fallback failed for {}: {}", url, e);
                Resolution::Unreachable(e.to_string())
            }
        }
    }

    /// Download every configured static asset that is not cached yet.
    /// Returns how many are cached afterwards.
    pub async fn precache_static_assets(&self) -> usize {
        let mut cached = 0;
        for asset in &self.config.static_assets {
            let address = match CanonicalAddress::parse(asset) {
                Ok(address) => address,
                Err(e) => {
                    warn!("skipping static asset {}: {}", asset, e);
                    continue;
                }
            };
            if self.statics.get(&address).await.is_some() {
                cached += 1;
                continue;
            }
            let Some(url) = self.network_url(&address) else {
                continue;
            };
            match self.source.get(&url).await {
                Ok(resp) if resp.is_ok() => {
                    let mime_type = resp
                        .content_type
                        .unwrap_or_else(|| mime_for_path(address.as_str()).to_string());
                    match self.statics.put(&address, resp.body, &mime_type).await {
                        Ok(()) => cached += 1,
                        Err(e) => warn!("failed to cache static asset {}: {}", address, e),
                    }
                }
                Ok(resp) => warn!("static asset {} answered {}", url, resp.status),
                Err(e) => warn!("static asset {} failed: {}", url, e),
            }
        }
        info!(
            "static assets cached: {}/{}",
            cached,
            self.config.static_assets.len()
        );
        cached
    }

    /// Address of the module's entry document.
    pub async fn locate_entry_document(&self, ns: &ModuleNamespace) -> Result<CanonicalAddress> {
        find_entry_document(self.modules.as_ref(), ns, &self.config.entry_document).await
    }

    /// Publish every resource of the module as a handle owned by `session`
    /// and return the handle of the rewritten entry document.
    pub async fn prepare_document(
        &self,
        session: &RenderingSession,
        ns: &ModuleNamespace,
    ) -> Result<BlobHandle> {
        let entry = self.locate_entry_document(ns).await?;
        let document = self
            .modules
            .get(&entry)
            .await
            .ok_or_else(|| EngineError::ResourceNotFound(entry.to_string()))?;

        let entry_rel = ns
            .relative_path(&entry)
            .unwrap_or(self.config.entry_document.as_str());
        let doc_dir = &entry_rel[..entry_rel.rfind('/').map_or(0, |i| i + 1)];

        let mut references = Vec::new();
        for address in self.modules.keys_with_prefix(ns.root()).await {
            if address == entry {
                continue;
            }
            let Some(resource) = self.modules.get(&address).await else {
                warn!("cached resource vanished: {}", address);
                continue;
            };
            let handle = session.create_handle(resource.content, &resource.mime_type);

            let Some(relative) = ns.relative_path(&address) else {
                continue;
            };
            let relative = relative_to(doc_dir, relative);
            let decoded = percent_decode(&relative);
            if decoded != relative {
                references.push((decoded, handle.url().to_string()));
            }
            references.push((relative, handle.url().to_string()));
        }

        let map = ReferenceMap::from_entries(references);
        let text = String::from_utf8_lossy(&document.content);
        let rewritten = rewrite_references(&text, &map);

        let handle = session.create_handle(Bytes::from(rewritten), &document.mime_type);
        info!(
            "prepared {} for session {} with {} handles",
            entry,
            session.id(),
            session.handle_count()
        );
        Ok(handle)
    }

    fn is_local(&self, address: &CanonicalAddress) -> bool {
        address.as_str().starts_with(self.config.origin.as_str())
    }

    /// Where to fetch `address` from when it is not cached. Origin-relative
    /// addresses map onto the upstream origin, if one is configured.
    fn network_url(&self, address: &CanonicalAddress) -> Option<String> {
        match address.as_str().strip_prefix(self.config.origin.as_str()) {
            Some(rest) => {
                let upstream = self.config.upstream_origin.as_ref()?;
                upstream.join(rest).ok().map(|u| u.to_string())
            }
            None => Some(address.to_string()),
        }
    }
}

/// Locate `entry_document` among the cached entries of `ns`.
///
/// Prefers `{root}{entry_document}`; otherwise the shallowest cached entry
/// with that file name.
pub async fn find_entry_document(
    cache: &dyn ResourceCache,
    ns: &ModuleNamespace,
    entry_document: &str,
) -> Result<CanonicalAddress> {
    let exact = ns.address_for(entry_document)?;
    let keys = cache.keys_with_prefix(ns.root()).await;
    if keys.contains(&exact) {
        return Ok(exact);
    }
    let suffix = format!("/{entry_document}");
    keys.into_iter()
        .filter(|a| a.as_str().ends_with(&suffix))
        .min_by_key(|a| a.as_str().len())
        .ok_or_else(|| EngineError::ResourceNotFound(exact.to_string()))
}

/// Path of `target` as referenced from a document in directory `dir`.
/// Both are relative to the module root; `dir` is empty or ends with `/`.
fn relative_to(dir: &str, target: &str) -> String {
    let dir_parts: Vec<&str> = dir.split('/').filter(|p| !p.is_empty()).collect();
    let target_parts: Vec<&str> = target.split('/').collect();
    let (target_dirs, file) = target_parts.split_at(target_parts.len().saturating_sub(1));

    let common = dir_parts
        .iter()
        .zip(target_dirs)
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = "../".repeat(dir_parts.len() - common);
    for part in &target_dirs[common..] {
        out.push_str(part);
        out.push('/');
    }
    out.push_str(file.first().copied().unwrap_or_default());
    out
}
