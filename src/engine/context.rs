use std::sync::Arc;

use crate::cache::store::{DiskResourceCache, ResourceCache};
use crate::config::ResolvedConfig;
use crate::error::Result;
use crate::ledger::{ledger_file_name, ExtractionLedger, FileLedger};
use crate::source::traits::RemoteSource;

/// Shared collaborators handed to the pipeline, resolver and server.
#[derive(Clone)]
pub struct EngineContext {
    pub config: Arc<ResolvedConfig>,
    /// Extracted module resources.
    pub modules: Arc<dyn ResourceCache>,
    /// Catalog images and other static assets.
    pub statics: Arc<dyn ResourceCache>,
    pub ledger: Arc<dyn ExtractionLedger>,
    pub source: Arc<dyn RemoteSource>,
}

impl EngineContext {
    /// Open the durable stores under `config.data_dir`.
    ///
    /// The ledger file is named after the modules namespace, so it is
    /// purged together with the entries of an older cache version.
    pub fn open(config: Arc<ResolvedConfig>, source: Arc<dyn RemoteSource>) -> Result<Self> {
        let modules = DiskResourceCache::open(&config.data_dir, &config.modules_cache_name)?;
        let statics = DiskResourceCache::open(&config.data_dir, &config.static_cache_name)?;
        let ledger_path = config
            .data_dir
            .join(ledger_file_name(&config.modules_cache_name));
        let ledger = FileLedger::open(&ledger_path)?;

        Ok(Self {
            config,
            modules: Arc::new(modules),
            statics: Arc::new(statics),
            ledger: Arc::new(ledger),
            source,
        })
    }
}
