//! POST /webhooks/{webhook_id}

use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};

use super::AppState;

/// Accept one voice-platform event. The raw body is taken as text so a
/// malformed payload can be logged verbatim.
pub(super) async fn receive(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
    body: String,
) -> Response {
    match state.dispatcher.handle(&webhook_id, &body).await {
        Ok(outcome) => Json(outcome.body()).into_response(),
        Err(e) => e.into_response(),
    }
}
