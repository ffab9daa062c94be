// Rendering sessions: one presented module, the handles it owns, and how it closes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::handles::{BlobHandle, HandleRegistry};
use crate::cache::address::ModuleNamespace;
use crate::error::Result;
use crate::resolve::resolver::ResourceResolver;

/// Why a rendering session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The host pressed the close control.
    Explicit,
    /// The module reported completion.
    CompletionMessage,
    /// The cancel key was pressed.
    CancelKey,
    /// Another module was launched.
    Replaced,
    /// Preparing or presenting the session failed.
    Error,
    /// The session was dropped without being closed.
    Dropped,
}

/// Messages posted by a presented module to its host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostMessage {
    ModuleComplete,
    #[serde(other)]
    Other,
}

/// Keys the host forwards to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKey {
    Escape,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationRequest {
    pub session_id: u64,
    pub module: String,
    pub title: String,
    /// URL of the rewritten entry document.
    pub url: String,
}

/// The full-screen frame a module is shown in.
pub trait PresentationSurface: Send + Sync {
    /// Show `request.url`. An error means the surface could not be created.
    fn present(&self, request: &PresentationRequest) -> Result<()>;

    fn dismiss(&self, _session_id: u64, _reason: CloseReason) {}
}

/// Surface that only logs, for headless hosts.
#[derive(Debug, Default)]
pub struct LoggingSurface;

impl PresentationSurface for LoggingSurface {
    fn present(&self, request: &PresentationRequest) -> Result<()> {
        info!(
            "presenting {} ({}) at {}",
            request.module, request.title, request.url
        );
        Ok(())
    }

    fn dismiss(&self, session_id: u64, reason: CloseReason) {
        info!("dismissed session {} ({:?})", session_id, reason);
    }
}

/// One presented module and every handle created for it.
///
/// Closing revokes all handles exactly once, whatever the trigger.
pub struct RenderingSession {
    id: u64,
    module: String,
    display_name: String,
    registry: Arc<HandleRegistry>,
    handles: Mutex<Vec<BlobHandle>>,
    entry_url: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl RenderingSession {
    pub(crate) fn new(
        id: u64,
        module: &str,
        display_name: &str,
        registry: Arc<HandleRegistry>,
    ) -> Self {
        Self {
            id,
            module: module.to_string(),
            display_name: display_name.to_string(),
            registry,
            handles: Mutex::new(Vec::new()),
            entry_url: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn entry_url(&self) -> Option<String> {
        self.entry_url.lock().clone()
    }

    pub fn handle_count(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn handles(&self) -> Vec<BlobHandle> {
        self.handles.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register `content` as a handle owned by this session.
    /// On a closed session the handle is revoked immediately.
    pub fn create_handle(&self, content: Bytes, mime_type: &str) -> BlobHandle {
        let handle = self.registry.create(content, mime_type);
        let mut handles = self.handles.lock();
        if self.is_closed() {
            self.registry.revoke(&handle);
        } else {
            handles.push(handle.clone());
        }
        handle
    }

    fn set_entry_url(&self, url: &str) {
        *self.entry_url.lock() = Some(url.to_string());
    }

    /// Revoke every handle. Returns `false` if already closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        let handles = {
            let mut handles = self.handles.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return false;
            }
            std::mem::take(&mut *handles)
        };
        let revoked = handles.iter().filter(|h| self.registry.revoke(h)).count();
        info!(
            "session {} ({}) closed: {:?}, revoked {} handles",
            self.id, self.module, reason, revoked
        );
        true
    }
}

impl Drop for RenderingSession {
    fn drop(&mut self) {
        self.close(CloseReason::Dropped);
    }
}

/// Owns the single active rendering session.
pub struct SessionManager {
    registry: Arc<HandleRegistry>,
    resolver: Arc<ResourceResolver>,
    surface: Arc<dyn PresentationSurface>,
    active: Mutex<Option<Arc<RenderingSession>>>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new(
        registry: Arc<HandleRegistry>,
        resolver: Arc<ResourceResolver>,
        surface: Arc<dyn PresentationSurface>,
    ) -> Self {
        Self {
            registry,
            resolver,
            surface,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    pub fn active(&self) -> Option<Arc<RenderingSession>> {
        self.active.lock().clone()
    }

    /// Close any active session, then build and present `ns`.
    pub async fn open(
        &self,
        ns: &ModuleNamespace,
        display_name: &str,
    ) -> Result<Arc<RenderingSession>> {
        self.close_active(CloseReason::Replaced);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(RenderingSession::new(
            id,
            ns.module(),
            display_name,
            self.registry.clone(),
        ));

        let document = match self.resolver.prepare_document(&session, ns).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("session {} for {} failed to prepare: {}", id, ns.module(), e);
                session.close(CloseReason::Error);
                return Err(e);
            }
        };
        session.set_entry_url(document.url());

        let request = PresentationRequest {
            session_id: id,
            module: ns.module().to_string(),
            title: display_name.to_string(),
            url: document.url().to_string(),
        };
        if let Err(e) = self.surface.present(&request) {
            warn!("session {} could not be presented: {}", id, e);
            session.close(CloseReason::Error);
            return Err(e);
        }

        let previous = self.active.lock().replace(session.clone());
        if let Some(previous) = previous {
            self.finish(&previous, CloseReason::Replaced);
        }
        Ok(session)
    }

    /// Close the active session, if any, and return its id.
    pub fn close_active(&self, reason: CloseReason) -> Option<u64> {
        let session = self.active.lock().take()?;
        self.finish(&session, reason);
        Some(session.id())
    }

    pub fn handle_message(&self, message: &HostMessage) -> Option<u64> {
        match message {
            HostMessage::ModuleComplete => self.close_active(CloseReason::CompletionMessage),
            HostMessage::Other => {
                debug!("ignoring host message");
                None
            }
        }
    }

    pub fn handle_key(&self, key: HostKey) -> Option<u64> {
        match key {
            HostKey::Escape => self.close_active(CloseReason::CancelKey),
            HostKey::Other => None,
        }
    }

    fn finish(&self, session: &RenderingSession, reason: CloseReason) {
        if session.close(reason) {
            self.surface.dismiss(session.id(), reason);
        }
    }
}
