#![forbid(unsafe_code)]

// Signaling module - WebSocket signaling server plus the WHIP HTTP surface

pub mod protocol;
pub mod session;

use crate::engine::MediaEngine;
use crate::metrics::ServerMetrics;
use crate::registry::ProducerRegistry;
use crate::whip::{self, WhipResources};
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Signaling server state
#[derive(Clone)]
pub struct SignalingServer {
    engine: Arc<MediaEngine>,
    registry: Arc<ProducerRegistry>,
    whip: Arc<WhipResources>,
    metrics: ServerMetrics,
    connection_semaphore: Arc<Semaphore>,
}

impl SignalingServer {
    /// Creates a new signaling server
    pub fn new(
        engine: Arc<MediaEngine>,
        registry: Arc<ProducerRegistry>,
        whip: Arc<WhipResources>,
        metrics: ServerMetrics,
    ) -> Self {
        let mut max_connections: usize = std::env::var("MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);
        if max_connections == 0 {
            warn!("MAX_CONNECTIONS=0 would reject all connections, using default 100");
            max_connections = 100;
        }
        info!("Max connections: {max_connections}");

        Self {
            engine,
            registry,
            whip,
            metrics,
            connection_semaphore: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// The WHIP resource map behind this server
    pub fn whip(&self) -> &WhipResources {
        &self.whip
    }

    /// Creates the Axum router for the server
    pub fn router(self) -> Router {
        use axum::routing::post;

        // Location and ETag must be readable cross-origin for the ingest
        // client to manage its resource
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers(Any)
            .expose_headers([header::LOCATION, header::ETAG]);

        Router::new()
            .route("/ws", get(ws_handler))
            .route(
                "/whip/{resource_id}",
                post(whip::create)
                    .delete(whip::delete)
                    .options(whip::preflight),
            )
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self)
            .layer(cors)
    }

    /// Starts the server on the specified port
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the port
    pub async fn serve(self, port: u16) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{port}");
        info!("Starting server on {addr}");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let app = self.router();

        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Health check handler
async fn health_handler(State(server): State<SignalingServer>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "resources": server.whip.len(),
        "producers": server.registry.len(),
    }))
}

/// Metrics handler — Prometheus text exposition format.
/// Protected by optional METRICS_TOKEN env var (Bearer auth).
async fn metrics_handler(State(server): State<SignalingServer>, headers: HeaderMap) -> Response {
    // Check bearer token if METRICS_TOKEN is configured
    if let Ok(expected) = std::env::var("METRICS_TOKEN") {
        let provided = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != format!("Bearer {expected}") {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let body = server
        .metrics
        .render_prometheus(server.whip.len(), server.registry.len());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(server): State<SignalingServer>) -> Response {
    // Acquire connection permit (non-blocking)
    let permit = match server.connection_semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            warn!("Connection limit reached, rejecting WebSocket upgrade");
            return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
        }
    };

    ws.max_message_size(65_536)
        .on_failed_upgrade(|error| {
            warn!("WebSocket upgrade failed: {error}");
        })
        .on_upgrade(move |socket| {
            session::handle_session(
                socket,
                server.engine,
                server.registry,
                server.metrics,
                permit,
            )
        })
}
