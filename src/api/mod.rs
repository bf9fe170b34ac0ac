//! HTTP surface: the inbound webhook endpoint, health, and the tenant read
//! endpoints that sit behind the cache.

mod calls;
mod webhooks;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::Cache;
use crate::pipeline::WebhookDispatcher;
use crate::store::Database;

pub use calls::{AnalysisSummary, CallAnalysisView, CallsPage, PAGE_SIZE};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub cache: Arc<Cache>,
    pub dispatcher: Arc<WebhookDispatcher>,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/{webhook_id}", post(webhooks::receive))
        .route("/api/users/{user_id}/calls", get(calls::list_calls))
        .route("/api/users/{user_id}/calls/{call_id}", get(calls::get_call))
        .route(
            "/api/users/{user_id}/calls/{call_id}/analysis",
            get(calls::get_call_analysis),
        )
        .route(
            "/api/users/{user_id}/calls/{call_id}/enrichment",
            get(calls::get_call_enrichment),
        )
        .route(
            "/api/users/{user_id}/analysis/summary",
            get(calls::get_analysis_summary),
        )
        .route(
            "/api/users/{user_id}/active-calls",
            get(calls::list_active_calls),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "call-insights"
    }))
}

/// JSON error body in the shape every endpoint uses.
fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({"error": message.into()})),
    )
        .into_response()
}
