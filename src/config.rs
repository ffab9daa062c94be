use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use tracing::info;

use crate::error::{EngineError, Result};

/// Remote host path that serves module archives and catalog images.
pub const DEFAULT_REMOTE_BASE: &str = "https://roadsafety.nt.gov.au/_media/elearning/";

/// Origin used to qualify canonical cache addresses.
pub const DEFAULT_ORIGIN: &str = "http://localhost";

/// Cache namespace prefix for static assets.
pub const STATIC_CACHE_PREFIX: &str = "drivesafe-static";

/// Cache namespace prefix for extracted module resources.
pub const MODULES_CACHE_PREFIX: &str = "drivesafe-modules";

/// Current cache namespace version. Bumping it invalidates older entries.
pub const CACHE_VERSION: u32 = 2;

/// Name of the document loaded into the rendering surface.
pub const ENTRY_DOCUMENT: &str = "story.html";

/// Seconds a failure message stays on the overlay before it is dismissed.
pub const ERROR_DISMISS_SECONDS: u64 = 5;

/// Module that ships as two archive parts.
pub const MULTI_PART_MODULE: &str = "m4-roadrules";

const STATIC_IMAGES: &[&str] = &[
    "header.png",
    "walkthroughBtn.png",
    "intro.png",
    "m1.png",
    "m2.png",
    "m3.png",
    "m4.png",
    "m5.png",
    "where.png",
    "testBtn.png",
];

/// What to do when a single archive entry cannot be decompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryFailurePolicy {
    /// Abort the module; the ledger stays unmarked.
    #[default]
    FailModule,
    /// Skip the entry, keep extracting and mark the module complete.
    SkipEntry,
}

/// Top-level configuration for the module engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the cache namespaces and the ledger file.
    pub data_dir: PathBuf,
    /// Base URL that module archives are downloaded from.
    pub remote_base: String,
    /// Origin that qualifies every canonical address.
    pub origin: String,
    /// Host that answers origin-relative requests missing from the cache.
    pub upstream_origin: Option<String>,
    /// Global base path override; wins over everything else.
    pub base_path_override: Option<String>,
    /// Base path declared by the embedding page.
    pub declared_base_path: Option<String>,
    /// Address of the hosting document, used to derive a base path.
    pub host_document_url: Option<String>,
    /// Path scope answered by the interception server. Defaults to the base path.
    pub registration_path: Option<String>,
    /// Address the local server binds to.
    pub listen_addr: SocketAddr,
    pub static_cache_prefix: String,
    pub modules_cache_prefix: String,
    pub cache_version: u32,
    pub entry_document: String,
    /// Modules split into more than one archive, with their part counts.
    pub multi_part_modules: HashMap<String, u32>,
    /// Absolute URLs or origin-relative paths served from the static namespace.
    pub static_assets: Vec<String>,
    pub error_dismiss_secs: u64,
    pub entry_failure_policy: EntryFailurePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: std::env::temp_dir().join("module-loader-engine"),
            remote_base: DEFAULT_REMOTE_BASE.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            upstream_origin: None,
            base_path_override: None,
            declared_base_path: None,
            host_document_url: None,
            registration_path: None,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            static_cache_prefix: STATIC_CACHE_PREFIX.to_string(),
            modules_cache_prefix: MODULES_CACHE_PREFIX.to_string(),
            cache_version: CACHE_VERSION,
            entry_document: ENTRY_DOCUMENT.to_string(),
            multi_part_modules: HashMap::from([(MULTI_PART_MODULE.to_string(), 2)]),
            static_assets: STATIC_IMAGES
                .iter()
                .map(|img| format!("{DEFAULT_REMOTE_BASE}images/{img}"))
                .collect(),
            error_dismiss_secs: ERROR_DISMISS_SECONDS,
            entry_failure_policy: EntryFailurePolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Missing keys take their default values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Resolve base path precedence and parse every address once.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        let origin = parse_url("origin", &self.origin)?;
        if origin.cannot_be_a_base() {
            return Err(EngineError::Config(format!(
                "origin {} cannot be used as a base",
                self.origin
            )));
        }
        let remote_base = parse_url("remote_base", &with_trailing_slash(&self.remote_base))?;
        let upstream_origin = match self.upstream_origin.as_deref() {
            Some(value) if !value.trim().is_empty() => {
                Some(parse_url("upstream_origin", &with_trailing_slash(value))?)
            }
            _ => None,
        };

        let (base_path, base_path_source) = resolve_base_path(
            self.base_path_override.as_deref(),
            self.declared_base_path.as_deref(),
            self.host_document_url.as_deref(),
        )?;

        let scope = match self.registration_path.as_deref() {
            Some(path) if !path.trim().is_empty() => normalize_base_path(path),
            _ => base_path.clone(),
        };

        let mut static_assets = Vec::with_capacity(self.static_assets.len());
        for asset in &self.static_assets {
            let url = if asset.starts_with("http://") || asset.starts_with("https://") {
                parse_url("static_assets", asset)?
            } else {
                origin
                    .join(asset)
                    .map_err(|e| EngineError::Config(format!("static asset {asset}: {e}")))?
            };
            static_assets.push(url.to_string());
        }

        if self.entry_document.trim().is_empty() {
            return Err(EngineError::Config("entry_document is empty".to_string()));
        }
        if self.multi_part_modules.values().any(|parts| *parts == 0) {
            return Err(EngineError::Config(
                "multi_part_modules part counts must be > 0".to_string(),
            ));
        }

        info!(
            "base path resolved to {} (source={:?}, scope={})",
            base_path, base_path_source, scope
        );

        Ok(ResolvedConfig {
            data_dir: self.data_dir.clone(),
            origin,
            remote_base,
            upstream_origin,
            base_path,
            base_path_source,
            scope,
            listen_addr: self.listen_addr,
            static_cache_name: namespace_name(&self.static_cache_prefix, self.cache_version),
            modules_cache_name: namespace_name(&self.modules_cache_prefix, self.cache_version),
            entry_document: self.entry_document.trim_start_matches('/').to_string(),
            multi_part_modules: self.multi_part_modules.clone(),
            static_assets,
            error_dismiss_after: Duration::from_secs(self.error_dismiss_secs),
            entry_failure_policy: self.entry_failure_policy,
        })
    }
}

/// Where the effective base path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasePathSource {
    Override,
    Declared,
    DerivedFromDocument,
    Root,
}

/// Configuration after validation, shared read-only by every component.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub data_dir: PathBuf,
    pub origin: Url,
    pub remote_base: Url,
    /// Always ends with `/`.
    pub upstream_origin: Option<Url>,
    /// Always starts and ends with `/`.
    pub base_path: String,
    pub base_path_source: BasePathSource,
    /// Path prefix answered by the interception server.
    pub scope: String,
    pub listen_addr: SocketAddr,
    pub static_cache_name: String,
    pub modules_cache_name: String,
    pub entry_document: String,
    pub multi_part_modules: HashMap<String, u32>,
    pub static_assets: Vec<String>,
    pub error_dismiss_after: Duration,
    pub entry_failure_policy: EntryFailurePolicy,
}

impl ResolvedConfig {
    /// Number of archive parts a module is split into.
    pub fn part_count(&self, module_name: &str) -> u32 {
        self.multi_part_modules
            .get(module_name)
            .copied()
            .unwrap_or(1)
            .max(1)
    }

    /// Whether an absolute address belongs to the static asset set.
    pub fn is_static_asset(&self, address: &str) -> bool {
        self.static_assets.iter().any(|asset| asset == address)
    }
}

/// Pick the base path by precedence: override, declared, derived, root.
pub fn resolve_base_path(
    override_path: Option<&str>,
    declared_path: Option<&str>,
    host_document_url: Option<&str>,
) -> Result<(String, BasePathSource)> {
    if let Some(path) = override_path.filter(|p| !p.trim().is_empty()) {
        return Ok((normalize_base_path(path), BasePathSource::Override));
    }
    if let Some(path) = declared_path.filter(|p| !p.trim().is_empty()) {
        return Ok((normalize_base_path(path), BasePathSource::Declared));
    }
    if let Some(doc) = host_document_url.filter(|d| !d.trim().is_empty()) {
        let url = parse_url("host_document_url", doc)?;
        let path = url.path();
        let dir = &path[..path.rfind('/').map_or(0, |i| i + 1)];
        return Ok((normalize_base_path(dir), BasePathSource::DerivedFromDocument));
    }
    Ok(("/".to_string(), BasePathSource::Root))
}

/// Force a leading and a trailing `/`. Full URLs are reduced to their path.
pub fn normalize_base_path(path: &str) -> String {
    let path = path.trim();
    let path = match Url::parse(path) {
        Ok(url) if !url.cannot_be_a_base() => url.path().to_string(),
        _ => path.to_string(),
    };
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}/")
    }
}

fn namespace_name(prefix: &str, version: u32) -> String {
    format!("{prefix}-v{version}")
}

fn with_trailing_slash(value: &str) -> String {
    if value.ends_with('/') {
        value.to_string()
    } else {
        format!("{value}/")
    }
}

fn parse_url(field: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| EngineError::Config(format!("{field} {value:?}: {e}")))
}
