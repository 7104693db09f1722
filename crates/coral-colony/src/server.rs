//! The colony's Mesh RPC service: an axum HTTP server exposing `Register`
//! and `Heartbeat`, with a per-remote-address message-size guard.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, RwLock};

use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use coral_proto::{HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse};
use coral_wireguard::Platform;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ColonyConfig;
use crate::error::{ColonyError, Result};
use crate::mesh::MeshHandler;
use crate::session::ViolationTracker;

struct ColonyState<P: Platform> {
    handler: MeshHandler<P>,
    config: Arc<ColonyConfig>,
    violations: RwLock<HashMap<IpAddr, ViolationTracker>>,
}

/// The colony's Mesh RPC service.
pub struct ColonyServer<P: Platform> {
    state: Arc<ColonyState<P>>,
}

impl<P: Platform + Send + Sync + 'static> ColonyServer<P> {
    #[must_use]
    pub fn new(config: Arc<ColonyConfig>, handler: MeshHandler<P>) -> Self {
        let state = Arc::new(ColonyState { handler, config, violations: RwLock::new(HashMap::new()) });
        Self { state }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/mesh/register", post(register_handler::<P>))
            .route("/mesh/heartbeat", post(heartbeat_handler::<P>))
            .layer(middleware::from_fn_with_state(self.state.clone(), enforce_message_size::<P>))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Runs the service until it errors or the process is terminated.
    ///
    /// # Errors
    ///
    /// Returns [`ColonyError::BindFailed`] if the configured address cannot
    /// be bound.
    pub async fn serve(&self) -> Result<()> {
        let addr = self.state.config.bind_addr;
        let listener =
            TcpListener::bind(addr).await.map_err(|e| ColonyError::BindFailed(addr, e))?;
        info!(%addr, "colony mesh RPC service listening");

        axum::serve(listener, self.router().into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(|e| ColonyError::Internal(e.to_string()))
    }

    /// As [`ColonyServer::serve`], but shuts down gracefully once `shutdown`
    /// resolves.
    ///
    /// # Errors
    ///
    /// Returns [`ColonyError::BindFailed`] if the configured address cannot
    /// be bound.
    pub async fn serve_with_shutdown<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = self.state.config.bind_addr;
        let listener =
            TcpListener::bind(addr).await.map_err(|e| ColonyError::BindFailed(addr, e))?;
        info!(%addr, "colony mesh RPC service listening");

        axum::serve(listener, self.router().into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ColonyError::Internal(e.to_string()))?;

        info!("colony mesh RPC service shut down");
        Ok(())
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn register_handler<P: Platform + Send + Sync + 'static>(
    State(state): State<Arc<ColonyState<P>>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<RegisterRequest>,
) -> Json<RegisterResponse> {
    let resp = state.handler.register(req, Some(addr.ip().to_string())).await;
    Json(resp)
}

async fn heartbeat_handler<P: Platform + Send + Sync + 'static>(
    State(state): State<Arc<ColonyState<P>>>,
    Json(req): Json<HeartbeatRequest>,
) -> Json<HeartbeatResponse> {
    Json(state.handler.heartbeat(req))
}

/// Rejects (and logs) requests whose `Content-Length` exceeds
/// [`ColonyConfig::max_message_size`], terminating a caller's access once it
/// has exceeded the limit more than [`ColonyConfig::max_violations`] times.
async fn enforce_message_size<P: Platform + Send + Sync + 'static, B>(
    State(state): State<Arc<ColonyState<P>>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<B>,
    next: Next,
) -> Response {
    let size = request
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);

    if size > state.config.max_message_size {
        let ip = addr.ip();
        let violations = {
            let mut table = state.violations.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            table.entry(ip).or_default().record_violation()
        };
        warn!(%ip, size, limit = state.config.max_message_size, violations, "oversized mesh RPC request");
        if state.violations.read().unwrap_or_else(std::sync::PoisonError::into_inner).get(&ip).is_some_and(|t| t.should_terminate(state.config.max_violations)) {
            warn!(%ip, "terminating caller after repeated message-size violations");
        }
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }

    next.run(request).await
}
