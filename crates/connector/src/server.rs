use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::liveness::Liveness;
use crate::metrics::encode_metrics;

/// Liveness of one feed
#[derive(Debug, Serialize)]
pub struct FeedStatus {
    pub feed: String,
    pub liveness: Liveness,
    pub connected: bool,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub feeds: Vec<FeedStatus>,
}

/// Shared state for status endpoints
#[derive(Clone, Default)]
pub struct ServerState {
    feeds: Vec<(String, watch::Receiver<Liveness>)>,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a feed's liveness
    pub fn with_feed(mut self, name: impl Into<String>, liveness: watch::Receiver<Liveness>) -> Self {
        self.feeds.push((name.into(), liveness));
        self
    }

    fn statuses(&self) -> Vec<FeedStatus> {
        self.feeds
            .iter()
            .map(|(feed, rx)| {
                let liveness = *rx.borrow();
                FeedStatus {
                    feed: feed.clone(),
                    liveness,
                    connected: liveness.is_connected(),
                }
            })
            .collect()
    }
}

/// Health endpoint - always returns 200 if server is running
async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        feeds: state.statuses(),
    })
}

/// Ready endpoint - returns 200 only when every feed is connected
async fn ready(State(state): State<ServerState>) -> (StatusCode, Json<HealthResponse>) {
    let feeds = state.statuses();
    let ready = feeds.iter().all(|f| f.connected);
    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if ready { "ready" } else { "not_ready" }.to_string(),
            feeds,
        }),
    )
}

/// Prometheus text exposition
async fn metrics() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}

/// Create the status server router
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the status server
pub async fn run_server(addr: SocketAddr, state: ServerState) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}
