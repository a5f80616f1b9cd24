//! `HuddleServer`: Axum HTTP + WebSocket hub.
//!
//! Routes:
//! - `POST /new-user`: claim a display name
//! - `POST /force-remove-user`: drop a name regardless of liveness
//! - `GET  /ws`: duplex channel
//! - `GET  /health`, `GET /metrics`: operational endpoints

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use huddle_core::protocol::{ApiStatus, ClaimResponse, NameRequest, StatusResponse};
use huddle_core::{ConnectionId, HubError};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::hub::Hub;
use crate::websocket::liveness::run_liveness_monitor;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registry plus open connections.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// Handles to the tasks spawned by [`HuddleServer::listen`].
pub struct ServerHandles {
    /// The Axum accept loop.
    pub server: JoinHandle<()>,
    /// The liveness monitor.
    pub monitor: JoinHandle<()>,
}

impl ServerHandles {
    /// Both handles, for [`ShutdownCoordinator::graceful_shutdown`].
    pub fn into_vec(self) -> Vec<JoinHandle<()>> {
        vec![self.server, self.monitor]
    }
}

/// The presence hub server.
pub struct HuddleServer {
    config: Arc<ServerConfig>,
    hub: Arc<Hub>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl HuddleServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            config: Arc::new(config),
            hub: Arc::new(Hub::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/new-user", post(claim_handler))
            .route("/force-remove-user", post(force_remove_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the listener, then spawn the accept loop and the liveness
    /// monitor. Both stop when the shutdown token is cancelled.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, ServerHandles)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "huddle server listening");

        let monitor_hub = self.hub.clone();
        let interval = self.config.sweep_interval;
        let monitor_token = self.shutdown.token();
        let monitor = tokio::spawn(async move {
            let _ = run_liveness_monitor(monitor_hub, interval, monitor_token).await;
        });

        let router = self.router();
        let token = self.shutdown.token();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
            {
                warn!(error = %e, "server exited with error");
            }
        });

        Ok((addr, ServerHandles { server, monitor }))
    }

    /// The hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn error_response(err: &HubError) -> (StatusCode, Json<StatusResponse>) {
    let status = match err {
        HubError::MissingName | HubError::Parse(_) => StatusCode::BAD_REQUEST,
        HubError::NameTaken { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(StatusResponse::error(err.to_string())))
}

/// Decode a name request leniently: a missing or unreadable body is treated
/// as an absent name.
fn name_request(body: &[u8]) -> NameRequest {
    serde_json::from_slice(body).unwrap_or_default()
}

/// POST /new-user
async fn claim_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ClaimResponse>, (StatusCode, Json<StatusResponse>)> {
    let request = name_request(&body);
    let claimed = request
        .validated_name()
        .and_then(|name| state.hub.claim(name));
    match claimed {
        Ok(user) => Ok(Json(ClaimResponse {
            status: ApiStatus::Ok,
            user,
        })),
        Err(e) => {
            info!(code = e.code(), "claim refused: {e}");
            Err(error_response(&e))
        }
    }
}

/// POST /force-remove-user
async fn force_remove_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Json<StatusResponse> {
    let request = name_request(&body);
    let removed = request
        .validated_name()
        .ok()
        .and_then(|name| state.hub.force_remove(name));
    match removed {
        Some(user) => Json(StatusResponse::ok(format!("User \"{}\" removed", user.name))),
        None => Json(StatusResponse::error("User not found")),
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let capacity = state.config.send_queue_capacity;
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, ConnectionId::new(), state.hub, capacity))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.connection_count(),
        state.hub.user_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}
