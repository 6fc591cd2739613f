//! HTTP surface: `GET /pets/{user_phone}` and `GET /health`.
//!
//! Every lookup outcome is answered with 200; callers read the body's
//! `status` field to detect failure.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use petgate_core::{LookupService, PetStore, PoolStatus};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn PetStore>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub pool: PoolStatus,
}

/// Build the router over a pet store.
pub fn router(store: Arc<dyn PetStore>) -> Router {
    Router::new()
        .route("/pets/{user_phone}", get(get_user_pets))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { store })
}

/// GET /pets/{user_phone}
async fn get_user_pets(
    State(state): State<AppState>,
    Path(user_phone): Path<String>,
) -> Json<Value> {
    let response = LookupService::handle(state.store, user_phone).await;
    Json(response.into_body())
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let pool = state.store.status();
    Json(HealthResponse {
        status: if pool.is_healthy() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        pool,
    })
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve(
    listener: TcpListener,
    store: Arc<dyn PetStore>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "HTTP server listening");

    axum::serve(listener, router(store)).with_graceful_shutdown(shutdown).await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}
