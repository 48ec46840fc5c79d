use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::connection::{ClientConnection, ClientSender};
use super::messages::ServerMessage;
use crate::config::ServerSettings;
use crate::engine::{Capability, EngineConfig, RealtimeEngine, SpeechEngine, ToolRegistry};
use crate::health::{self, HealthStatus};
use crate::retrieval::{SEARCH_TOOL_DESCRIPTION, SEARCH_TOOL_NAME};
use crate::session::{SessionSettings, VoiceSession};
use crate::Result;

/// Builds a fresh engine adapter for every accepted connection.
pub trait EngineFactory: Send + Sync + 'static {
    type Engine: SpeechEngine + 'static;

    /// # Errors
    /// Returns an error if the engine cannot be configured.
    #[allow(clippy::result_large_err)]
    fn create(&self) -> Result<Self::Engine>;
}

/// Realtime engines that can call the knowledge search capability.
pub struct RealtimeEngineFactory {
    config: EngineConfig,
    capability: Arc<dyn Capability>,
}

impl RealtimeEngineFactory {
    #[must_use]
    pub fn new(config: EngineConfig, capability: Arc<dyn Capability>) -> Self {
        Self { config, capability }
    }
}

impl EngineFactory for RealtimeEngineFactory {
    type Engine = RealtimeEngine;

    fn create(&self) -> Result<RealtimeEngine> {
        let mut tools = ToolRegistry::new();
        tools.capability(SEARCH_TOOL_NAME, SEARCH_TOOL_DESCRIPTION, Arc::clone(&self.capability));
        RealtimeEngine::builder()
            .config(self.config.clone())
            .tools(tools)
            .build()
    }
}

struct AppState<F> {
    factory: Arc<F>,
    session: SessionSettings,
    shutdown: CancellationToken,
}

impl<F> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            session: self.session,
            shutdown: self.shutdown.clone(),
        }
    }
}

/// The client-facing voice endpoint plus the health check.
pub struct Gateway<F> {
    factory: Arc<F>,
    session: SessionSettings,
    voice_path: String,
    health_path: String,
}

impl<F: EngineFactory> Gateway<F> {
    #[must_use]
    pub fn new(factory: F, server: &ServerSettings, session: SessionSettings) -> Self {
        Self {
            factory: Arc::new(factory),
            session,
            voice_path: server.voice_path.clone(),
            health_path: server.health_path.clone(),
        }
    }

    /// Routes for the voice socket and health check. Sessions started through
    /// this router end when `shutdown` is cancelled.
    pub fn router(&self, shutdown: CancellationToken) -> Router {
        let state = AppState {
            factory: Arc::clone(&self.factory),
            session: self.session,
            shutdown,
        };
        Router::new()
            .route(&self.health_path, get(health_handler))
            .route(&self.voice_path, get(voice_handler::<F>))
            .with_state(state)
    }

    /// Serve until `shutdown` is cancelled.
    ///
    /// # Errors
    /// Returns an error if the listener fails.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, voice_path = %self.voice_path, health_path = %self.health_path, "Voice gateway listening");
        let app = self.router(shutdown.clone());
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;
        tracing::info!("Voice gateway stopped");
        Ok(())
    }
}

async fn health_handler() -> Json<HealthStatus> {
    Json(health::check())
}

async fn voice_handler<F: EngineFactory>(State(state): State<AppState<F>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_connection(state, socket))
}

async fn run_connection<F: EngineFactory>(state: AppState<F>, socket: WebSocket) {
    let engine = match state.factory.create() {
        Ok(engine) => engine,
        Err(err) => {
            tracing::error!(error = %err, "Could not configure speech engine");
            let (mut sender, _receiver) = socket.into_split();
            if let Err(send_err) = sender.send(ServerMessage::Error { message: err.to_string() }).await {
                tracing::debug!(error = %send_err, "Could not report configuration failure");
            }
            sender.close().await;
            return;
        }
    };
    let session = VoiceSession::new(engine, state.session, &state.shutdown);
    session.start(socket).await;
}
