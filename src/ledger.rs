// Extraction-state ledger: durable per-module "extraction complete" flags.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

const FLAG_SUFFIX: &str = "_extracted";
const FLAG_VALUE: &str = "true";

/// Lifecycle of a module's extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionState {
    NotStarted,
    InProgress,
    Complete,
}

/// File name of the ledger that belongs to the modules cache `namespace`.
///
/// The ledger shares the namespace's version, so a version bump that purges
/// the cached entries also retires their flags.
pub fn ledger_file_name(namespace: &str) -> String {
    format!("{namespace}.ledger.json")
}

/// Storage key of a module's flag.
pub fn ledger_key(module_name: &str) -> String {
    format!("{module_name}{FLAG_SUFFIX}")
}

/// Durable record of which modules have been fully extracted.
///
/// Only "complete" is ever persisted. A run that dies before
/// `mark_complete` leaves no trace and is redone from scratch.
#[async_trait]
pub trait ExtractionLedger: Send + Sync {
    async fn is_complete(&self, module_name: &str) -> bool;

    /// Idempotent.
    async fn mark_complete(&self, module_name: &str) -> Result<()>;
}

/// Ledger persisted as a JSON object of `{module}_extracted` flags.
pub struct FileLedger {
    path: PathBuf,
    flags: tokio::sync::Mutex<BTreeMap<String, String>>,
}

impl FileLedger {
    /// Load the ledger at `path`; a missing or unreadable file starts empty.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let flags = match std::fs::read(path) {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                warn!("ledger {:?} unreadable, starting empty: {}", path, e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            flags: tokio::sync::Mutex::new(flags),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ExtractionLedger for FileLedger {
    async fn is_complete(&self, module_name: &str) -> bool {
        let flags = self.flags.lock().await;
        flags.get(&ledger_key(module_name)).map(String::as_str) == Some(FLAG_VALUE)
    }

    async fn mark_complete(&self, module_name: &str) -> Result<()> {
        let key = ledger_key(module_name);
        let mut flags = self.flags.lock().await;
        if flags.get(&key).map(String::as_str) == Some(FLAG_VALUE) {
            return Ok(());
        }

        let mut updated = flags.clone();
        updated.insert(key.clone(), FLAG_VALUE.to_string());
        let raw = serde_json::to_vec_pretty(&updated).map_err(|e| EngineError::Io(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        *flags = updated;
        debug!("ledger marked {}", key);
        Ok(())
    }
}

/// In-memory ledger for tests and ephemeral hosts.
#[derive(Default)]
pub struct MemoryLedger {
    complete: Mutex<HashSet<String>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExtractionLedger for MemoryLedger {
    async fn is_complete(&self, module_name: &str) -> bool {
        self.complete.lock().contains(&ledger_key(module_name))
    }

    async fn mark_complete(&self, module_name: &str) -> Result<()> {
        self.complete.lock().insert(ledger_key(module_name));
        Ok(())
    }
}
