// Shared fixtures: zip builders, a scripted remote and a recording surface.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use module_loader_engine::cache::store::MemoryResourceCache;
use module_loader_engine::config::EngineConfig;
use module_loader_engine::engine::context::EngineContext;
use module_loader_engine::engine::session::{CloseReason, PresentationRequest, PresentationSurface};
use module_loader_engine::error::{EngineError, Result};
use module_loader_engine::ledger::MemoryLedger;
use module_loader_engine::source::traits::{RemoteResponse, RemoteSource};

pub const REMOTE_BASE: &str = "http://remote.test/elearning/";

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Bytes {
    zip_with(entries, CompressionMethod::Deflated)
}

pub fn zip_with(entries: &[(&str, &[u8])], method: CompressionMethod) -> Bytes {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(method);
    for (path, content) in entries {
        if path.ends_with('/') {
            writer.add_directory(*path, options).unwrap();
        } else {
            writer.start_file(*path, options).unwrap();
            writer.write_all(content).unwrap();
        }
    }
    Bytes::from(writer.finish().unwrap().into_inner())
}

pub fn part_url(file_name: &str) -> String {
    format!("{REMOTE_BASE}{file_name}")
}

enum Scripted {
    Respond {
        status: u16,
        content_type: Option<String>,
        body: Bytes,
    },
    TransportError,
}

/// Remote that answers from a script and records every request.
/// Unscripted URLs answer 404.
#[derive(Default)]
pub struct FakeRemote {
    script: Mutex<HashMap<String, Scripted>>,
    requests: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, body: Bytes) {
        self.respond(url, 200, None, body);
    }

    pub fn respond(&self, url: &str, status: u16, content_type: Option<&str>, body: Bytes) {
        self.script.lock().insert(
            url.to_string(),
            Scripted::Respond {
                status,
                content_type: content_type.map(str::to_string),
                body,
            },
        );
    }

    pub fn fail_transport(&self, url: &str) {
        self.script
            .lock()
            .insert(url.to_string(), Scripted::TransportError);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl RemoteSource for FakeRemote {
    async fn get(&self, url: &str) -> Result<RemoteResponse> {
        self.requests.lock().push(url.to_string());
        match self.script.lock().get(url) {
            Some(Scripted::Respond {
                status,
                content_type,
                body,
            }) => Ok(RemoteResponse {
                status: *status,
                content_type: content_type.clone(),
                body: body.clone(),
            }),
            Some(Scripted::TransportError) => Err(EngineError::DownloadFailed {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            }),
            None => Ok(RemoteResponse {
                status: 404,
                content_type: None,
                body: Bytes::new(),
            }),
        }
    }
}

/// Surface that records presentations and dismissals.
#[derive(Default)]
pub struct RecordingSurface {
    pub presented: Mutex<Vec<PresentationRequest>>,
    pub dismissed: Mutex<Vec<(u64, CloseReason)>>,
    pub refuse: AtomicBool,
}

impl RecordingSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn last_presented(&self) -> Option<PresentationRequest> {
        self.presented.lock().last().cloned()
    }
}

impl PresentationSurface for RecordingSurface {
    fn present(&self, request: &PresentationRequest) -> Result<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(EngineError::PopupBlocked("surface refused".to_string()));
        }
        self.presented.lock().push(request.clone());
        Ok(())
    }

    fn dismiss(&self, session_id: u64, reason: CloseReason) {
        self.dismissed.lock().push((session_id, reason));
    }
}

pub fn test_config(data_dir: &Path) -> EngineConfig {
    EngineConfig {
        data_dir: data_dir.to_path_buf(),
        remote_base: REMOTE_BASE.to_string(),
        static_assets: vec![format!("{REMOTE_BASE}images/header.png")],
        ..EngineConfig::default()
    }
}

/// In-memory collaborators around `remote`.
pub struct MemoryContext {
    pub ctx: EngineContext,
    pub modules: Arc<MemoryResourceCache>,
    pub statics: Arc<MemoryResourceCache>,
    pub ledger: Arc<MemoryLedger>,
}

pub fn memory_context(config: EngineConfig, remote: Arc<FakeRemote>) -> MemoryContext {
    let resolved = config.resolve().unwrap();
    let modules = Arc::new(MemoryResourceCache::new(resolved.modules_cache_name.clone()));
    let statics = Arc::new(MemoryResourceCache::new(resolved.static_cache_name.clone()));
    let ledger = Arc::new(MemoryLedger::new());
    let ctx = EngineContext {
        config: Arc::new(resolved),
        modules: modules.clone(),
        statics: statics.clone(),
        ledger: ledger.clone(),
        source: remote,
    };
    MemoryContext {
        ctx,
        modules,
        statics,
        ledger,
    }
}
