// Engine facade wiring the stores, pipeline, sessions and local server together.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::config::{EngineConfig, ResolvedConfig};
use crate::engine::catalog::{ModuleSpec, DEFAULT_CATALOG};
use crate::engine::context::EngineContext;
use crate::engine::handles::HandleRegistry;
use crate::engine::pipeline::{AcquisitionPipeline, AcquisitionReport};
use crate::engine::progress::{AcquisitionPhase, OverlayState, StatusOverlay};
use crate::engine::session::{
    CloseReason, HostKey, HostMessage, LoggingSurface, PresentationSurface, RenderingSession,
    SessionManager,
};
use crate::engine::stats::{AcquisitionStats, StatsSnapshot};
use crate::error::Result;
use crate::ledger::ExtractionState;
use crate::resolve::resolver::ResourceResolver;
use crate::server::handler::{ModuleServer, ServerState};
use crate::source::http_source::HttpSource;

/// Result of a successful launch.
#[derive(Debug, Clone)]
pub struct LaunchOutcome {
    pub report: AcquisitionReport,
    pub session_id: u64,
    /// URL the presentation surface was pointed at.
    pub presentation_url: String,
}

pub struct ModuleEngine {
    config: Arc<ResolvedConfig>,
    pipeline: AcquisitionPipeline,
    resolver: Arc<ResourceResolver>,
    sessions: Arc<SessionManager>,
    handles: Arc<HandleRegistry>,
    server: Option<ModuleServer>,
}

impl ModuleEngine {
    /// Open the durable stores under `config.data_dir` and start serving.
    pub async fn start(config: EngineConfig) -> anyhow::Result<Self> {
        let resolved = Arc::new(config.resolve()?);
        let ctx = EngineContext::open(resolved, Arc::new(HttpSource::new()))?;
        Self::start_with(ctx, Arc::new(LoggingSurface)).await
    }

    /// Start with caller-supplied collaborators.
    pub async fn start_with(
        ctx: EngineContext,
        surface: Arc<dyn PresentationSurface>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(ctx.config.listen_addr).await?;
        let addr = listener.local_addr()?;

        let handles = Arc::new(HandleRegistry::new(format!("http://{addr}")));
        let resolver = Arc::new(ResourceResolver::new(&ctx));
        let sessions = Arc::new(SessionManager::new(
            handles.clone(),
            resolver.clone(),
            surface,
        ));

        let server = ModuleServer::start(
            listener,
            ServerState {
                config: ctx.config.clone(),
                handles: handles.clone(),
                resolver: resolver.clone(),
                sessions: sessions.clone(),
            },
        )
        .await?;

        let overlay = Arc::new(StatusOverlay::new(ctx.config.error_dismiss_after));
        let stats = Arc::new(AcquisitionStats::new());
        let config = ctx.config.clone();
        let pipeline = AcquisitionPipeline::new(ctx, overlay, stats);

        info!(
            "engine started: server={} modules_cache={} remote_base={}",
            server.base_url(),
            config.modules_cache_name,
            config.remote_base
        );

        Ok(Self {
            config,
            pipeline,
            resolver,
            sessions,
            handles,
            server: Some(server),
        })
    }

    /// Acquire `module_name` if needed, then present it.
    ///
    /// Any active session is closed first. A failed launch leaves no
    /// session open and shows the failure on the overlay.
    pub async fn launch(&self, module_name: &str, display_name: &str) -> Result<LaunchOutcome> {
        self.sessions.close_active(CloseReason::Replaced);

        let report = self.pipeline.acquire(module_name, display_name).await?;

        let title = if display_name.trim().is_empty() {
            module_name
        } else {
            display_name
        };
        let session = match self.sessions.open(&report.namespace, title).await {
            Ok(session) => session,
            Err(e) => {
                self.pipeline.overlay().report(AcquisitionPhase::Failed {
                    module: module_name.to_string(),
                    message: e.user_message().to_string(),
                });
                return Err(e);
            }
        };

        Ok(LaunchOutcome {
            report,
            session_id: session.id(),
            presentation_url: session.entry_url().unwrap_or_default(),
        })
    }

    /// Close control pressed by the host.
    pub fn close_session(&self) -> Option<u64> {
        self.sessions.close_active(CloseReason::Explicit)
    }

    pub fn handle_key(&self, key: HostKey) -> Option<u64> {
        self.sessions.handle_key(key)
    }

    pub fn handle_message(&self, message: &HostMessage) -> Option<u64> {
        self.sessions.handle_message(message)
    }

    pub fn active_session(&self) -> Option<Arc<RenderingSession>> {
        self.sessions.active()
    }

    pub async fn state(&self, module_name: &str) -> ExtractionState {
        self.pipeline.state(module_name).await
    }

    pub async fn precache_static_assets(&self) -> usize {
        self.resolver.precache_static_assets().await
    }

    /// Catalog modules with their resolved part lists.
    pub fn catalog(&self) -> Result<Vec<ModuleSpec>> {
        DEFAULT_CATALOG
            .iter()
            .map(|(name, display)| ModuleSpec::new(&self.config, name, display))
            .collect()
    }

    pub fn overlay(&self) -> watch::Receiver<OverlayState> {
        self.pipeline.overlay().subscribe()
    }

    pub fn overlay_state(&self) -> OverlayState {
        self.pipeline.overlay().state()
    }

    pub fn phases(&self) -> broadcast::Receiver<AcquisitionPhase> {
        self.pipeline.overlay().subscribe_phases()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.pipeline.stats().snapshot()
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn handles(&self) -> &Arc<HandleRegistry> {
        &self.handles
    }

    /// Root URL of the local server.
    pub fn server_url(&self) -> String {
        self.server
            .as_ref()
            .map(ModuleServer::base_url)
            .unwrap_or_default()
    }

    /// Close the active session and stop the server.
    pub fn shutdown(mut self) {
        self.sessions.close_active(CloseReason::Explicit);
        if let Some(server) = self.server.take() {
            server.shutdown();
        }
        info!("engine shut down");
    }
}
