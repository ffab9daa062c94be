// Acquisition pipeline: downloads each archive part and caches its entries.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::catalog::ModuleSpec;
use super::context::EngineContext;
use super::progress::{AcquisitionPhase, StatusOverlay};
use super::stats::AcquisitionStats;
use crate::archive::extractor::{ArchiveReader, EntryHandle};
use crate::cache::address::ModuleNamespace;
use crate::cache::mime::mime_for_path;
use crate::config::EntryFailurePolicy;
use crate::error::{EngineError, Result};
use crate::ledger::ExtractionState;
use crate::resolve::resolver::find_entry_document;

/// Outcome of one successful acquisition.
#[derive(Debug, Clone)]
pub struct AcquisitionReport {
    pub module: String,
    pub namespace: ModuleNamespace,
    pub parts: u32,
    pub entries_written: usize,
    pub bytes_written: u64,
    /// Entries left out under [`EntryFailurePolicy::SkipEntry`].
    pub skipped_entries: Vec<String>,
    /// The ledger already recorded the module; nothing was downloaded.
    pub from_cache: bool,
}

/// Makes a module's resources available in the module cache exactly once.
///
/// Runs for the same module are serialized; a second run waits for the
/// first and then finds the ledger marked.
pub struct AcquisitionPipeline {
    ctx: EngineContext,
    overlay: Arc<StatusOverlay>,
    stats: Arc<AcquisitionStats>,
    module_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl AcquisitionPipeline {
    pub fn new(ctx: EngineContext, overlay: Arc<StatusOverlay>, stats: Arc<AcquisitionStats>) -> Self {
        Self {
            ctx,
            overlay,
            stats,
            module_locks: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn overlay(&self) -> &Arc<StatusOverlay> {
        &self.overlay
    }

    pub fn stats(&self) -> &Arc<AcquisitionStats> {
        &self.stats
    }

    pub fn namespace(&self, module_name: &str) -> Result<ModuleNamespace> {
        ModuleNamespace::new(
            &self.ctx.config.origin,
            &self.ctx.config.base_path,
            module_name,
        )
    }

    pub async fn state(&self, module_name: &str) -> ExtractionState {
        if self.in_flight.lock().contains(module_name) {
            return ExtractionState::InProgress;
        }
        if self.ctx.ledger.is_complete(module_name).await {
            ExtractionState::Complete
        } else {
            ExtractionState::NotStarted
        }
    }

    /// Ensure every resource of `module_name` is cached.
    ///
    /// On failure the overlay shows the error's plain-language message and
    /// the ledger is left unmarked, so the next launch starts over.
    pub async fn acquire(&self, module_name: &str, display_name: &str) -> Result<AcquisitionReport> {
        let spec = ModuleSpec::new(&self.ctx.config, module_name, display_name)?;
        let namespace = self.namespace(module_name)?;

        let lock = self.module_lock(module_name);
        let _serialized = lock.lock().await;

        if self.ctx.ledger.is_complete(module_name).await {
            if self.entry_document_cached(&namespace).await {
                info!("module {} already extracted, skipping download", module_name);
                self.stats.record_ledger_hit();
                self.overlay.report(AcquisitionPhase::Ready {
                    module: module_name.to_string(),
                });
                return Ok(AcquisitionReport {
                    module: module_name.to_string(),
                    namespace,
                    parts: spec.parts.len() as u32,
                    entries_written: 0,
                    bytes_written: 0,
                    skipped_entries: Vec::new(),
                    from_cache: true,
                });
            }
            warn!(
                "module {} is marked extracted but its entry document is not cached, extracting again",
                module_name
            );
        }

        let _in_flight = InFlightGuard::enter(&self.in_flight, module_name);
        match self.extract(&spec, namespace).await {
            Ok(report) => {
                info!(
                    "module {} ready: parts={} entries={} bytes={} skipped={}",
                    module_name,
                    report.parts,
                    report.entries_written,
                    report.bytes_written,
                    report.skipped_entries.len()
                );
                self.overlay.report(AcquisitionPhase::Ready {
                    module: module_name.to_string(),
                });
                Ok(report)
            }
            Err(e) => {
                error!("module {} acquisition failed: {}", module_name, e);
                self.stats.record_failure();
                self.overlay.report(AcquisitionPhase::Failed {
                    module: module_name.to_string(),
                    message: e.user_message().to_string(),
                });
                Err(e)
            }
        }
    }

    async fn extract(&self, spec: &ModuleSpec, namespace: ModuleNamespace) -> Result<AcquisitionReport> {
        let config = &self.ctx.config;
        let mut report = AcquisitionReport {
            module: spec.name.clone(),
            namespace,
            parts: spec.parts.len() as u32,
            entries_written: 0,
            bytes_written: 0,
            skipped_entries: Vec::new(),
            from_cache: false,
        };

        for part in &spec.parts {
            self.overlay.report(AcquisitionPhase::Preparing {
                module: spec.name.clone(),
                display_name: spec.display_name.clone(),
                part: part.number,
                total_parts: part.total,
            });

            let url = spec.part_url(&config.remote_base, part)?;
            info!(
                "downloading {} part {}/{} url={}",
                spec.name, part.number, part.total, url
            );
            let resp = self.ctx.source.get(&url).await?;
            if !resp.is_ok() {
                return Err(EngineError::download(&url, format!("HTTP {}", resp.status)));
            }
            self.stats.record_part_downloaded(resp.body.len() as u64);

            let mut reader = ArchiveReader::open(resp.body)?;
            let files: Vec<EntryHandle> = reader.files().cloned().collect();
            for entry in &files {
                let content = match reader.read(entry) {
                    Ok(content) => content,
                    Err(e) if config.entry_failure_policy == EntryFailurePolicy::SkipEntry => {
                        warn!("skipping entry {} of {}: {}", entry.path(), spec.name, e);
                        self.stats.record_entry_skipped();
                        report.skipped_entries.push(entry.path().to_string());
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let address = report.namespace.address_for(entry.path())?;
                let len = content.len() as u64;
                self.ctx
                    .modules
                    .put(&address, content, mime_for_path(entry.path()))
                    .await?;
                self.stats.record_entry_written(len);
                report.entries_written += 1;
                report.bytes_written += len;
            }
        }

        // A module without a presentable entry document is never marked.
        if !self.entry_document_cached(&report.namespace).await {
            let missing = report.namespace.address_for(&config.entry_document)?;
            return Err(EngineError::ResourceNotFound(missing.to_string()));
        }

        self.ctx.ledger.mark_complete(&spec.name).await?;
        Ok(report)
    }

    /// Whether the module's entry document can be read back from the cache.
    async fn entry_document_cached(&self, namespace: &ModuleNamespace) -> bool {
        let modules = self.ctx.modules.as_ref();
        match find_entry_document(modules, namespace, &self.ctx.config.entry_document).await {
            Ok(address) => modules.get(&address).await.is_some(),
            Err(_) => false,
        }
    }

    fn module_lock(&self, module_name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.module_locks
            .lock()
            .entry(module_name.to_string())
            .or_default()
            .clone()
    }
}

/// Marks a module in progress until dropped, including on cancellation.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    module: String,
}

impl InFlightGuard {
    fn enter(set: &Arc<Mutex<HashSet<String>>>, module: &str) -> Self {
        set.lock().insert(module.to_string());
        Self {
            set: set.clone(),
            module: module.to_string(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.module);
    }
}
