//! Tenant read endpoints. Every response is served through the cache under
//! the tenant's namespace, so pipeline invalidation is what keeps them fresh.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use super::{AppState, error_response};
use crate::cache::CacheKey;
use crate::error::DatabaseError;
use crate::store::{
    ActiveCall, AddonResult, AnalysisCounts, CallAnalysis, CallRecord, CallerIdentity,
    KeywordAggregate,
};

/// Calls per listing page.
pub const PAGE_SIZE: usize = 20;

/// Keywords included in the analysis summary.
const SUMMARY_KEYWORDS: usize = 10;

#[derive(Debug, Deserialize)]
pub(super) struct PageParams {
    page: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallsPage {
    pub page: u32,
    pub page_size: usize,
    pub calls: Vec<CallRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAnalysisView {
    pub call_id: Uuid,
    pub analysis_completed: bool,
    pub analysis: Option<CallAnalysis>,
    pub caller: CallerIdentity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    #[serde(flatten)]
    pub counts: AnalysisCounts,
    pub top_keywords: Vec<KeywordAggregate>,
}

fn internal_error(op: &str, e: DatabaseError) -> Response {
    error!(op, error = %e, "Read endpoint failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

fn call_not_found(call_id: Uuid) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("call {call_id} not found"))
}

/// A call, if it exists and belongs to the tenant.
async fn owned_call(
    state: &AppState,
    user_id: &str,
    call_id: Uuid,
) -> Result<Option<CallRecord>, DatabaseError> {
    state
        .cache
        .get_or_load(
            &CacheKey::call(user_id, call_id),
            state.cache.default_ttl(),
            || async {
                let call = state.db.get_call(call_id).await?;
                Ok::<_, DatabaseError>(call.filter(|c| c.user_id == user_id))
            },
        )
        .await
}

/// GET /api/users/{user_id}/calls?page=N
pub(super) async fn list_calls(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<PageParams>,
) -> Response {
    let page = params.page.unwrap_or(1).max(1);
    let result = state
        .cache
        .get_or_load(
            &CacheKey::recordings_page(&user_id, page),
            state.cache.list_ttl(),
            || async {
                let offset = (page as usize - 1) * PAGE_SIZE;
                let calls = state.db.list_calls(&user_id, PAGE_SIZE, offset).await?;
                Ok::<_, DatabaseError>(CallsPage {
                    page,
                    page_size: PAGE_SIZE,
                    calls,
                })
            },
        )
        .await;

    match result {
        Ok(page) => Json(page).into_response(),
        Err(e) => internal_error("list_calls", e),
    }
}

/// GET /api/users/{user_id}/calls/{call_id}
pub(super) async fn get_call(
    State(state): State<AppState>,
    Path((user_id, call_id)): Path<(String, Uuid)>,
) -> Response {
    match owned_call(&state, &user_id, call_id).await {
        Ok(Some(call)) => Json(call).into_response(),
        Ok(None) => call_not_found(call_id),
        Err(e) => internal_error("get_call", e),
    }
}

/// GET /api/users/{user_id}/calls/{call_id}/analysis
pub(super) async fn get_call_analysis(
    State(state): State<AppState>,
    Path((user_id, call_id)): Path<(String, Uuid)>,
) -> Response {
    let result = state
        .cache
        .get_or_load(
            &CacheKey::call_analysis(&user_id, call_id),
            state.cache.default_ttl(),
            || async {
                Ok::<_, DatabaseError>(owned_call(&state, &user_id, call_id).await?.map(|call| {
                    CallAnalysisView {
                        call_id: call.id,
                        analysis_completed: call.analysis_completed(),
                        analysis: call.analysis,
                        caller: call.caller,
                    }
                }))
            },
        )
        .await;

    match result {
        Ok(Some(view)) => Json(view).into_response(),
        Ok(None) => call_not_found(call_id),
        Err(e) => internal_error("get_call_analysis", e),
    }
}

/// GET /api/users/{user_id}/calls/{call_id}/enrichment
pub(super) async fn get_call_enrichment(
    State(state): State<AppState>,
    Path((user_id, call_id)): Path<(String, Uuid)>,
) -> Response {
    let result = state
        .cache
        .get_or_load(
            &CacheKey::enrichment(&user_id, call_id),
            state.cache.default_ttl(),
            || async {
                if owned_call(&state, &user_id, call_id).await?.is_none() {
                    return Ok(None);
                }
                let results: Vec<AddonResult> = state.db.list_addon_results(call_id).await?;
                Ok::<_, DatabaseError>(Some(results))
            },
        )
        .await;

    match result {
        Ok(Some(results)) => Json(results).into_response(),
        Ok(None) => call_not_found(call_id),
        Err(e) => internal_error("get_call_enrichment", e),
    }
}

/// GET /api/users/{user_id}/analysis/summary
pub(super) async fn get_analysis_summary(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Response {
    let result = state
        .cache
        .get_or_load(
            &CacheKey::analysis_summary(&user_id),
            state.cache.default_ttl(),
            || async {
                let counts = state.db.analysis_counts(&user_id).await?;
                let top_keywords = state.db.list_keywords(&user_id, SUMMARY_KEYWORDS).await?;
                Ok::<_, DatabaseError>(AnalysisSummary {
                    counts,
                    top_keywords,
                })
            },
        )
        .await;

    match result {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => internal_error("get_analysis_summary", e),
    }
}

/// GET /api/users/{user_id}/active-calls
pub(super) async fn list_active_calls(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Response {
    let result = state
        .cache
        .get_or_load(
            &CacheKey::active_calls(&user_id),
            state.cache.list_ttl(),
            || async {
                let calls: Vec<ActiveCall> = state.db.list_active_calls(&user_id).await?;
                Ok::<_, DatabaseError>(calls)
            },
        )
        .await;

    match result {
        Ok(calls) => Json(serde_json::json!({"count": calls.len(), "calls": calls})).into_response(),
        Err(e) => internal_error("list_active_calls", e),
    }
}

#[cfg(test)]
mod tests {
    use super::super::router;
    use super::*;
    use crate::cache::Cache;
    use crate::clients::{AddonRegistry, AnalysisResult, CallAnalyzer, CallerLookup, LookupCredentials};
    use crate::config::CacheConfig;
    use crate::pipeline::{BackgroundTasks, EnrichmentOrchestrator, TriggerDispatcher, WebhookDispatcher};
    use crate::store::{Database, LibSqlBackend};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use secrecy::SecretString;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct Offline;

    #[async_trait]
    impl CallAnalyzer for Offline {
        async fn analyze(
            &self,
            _summary: Option<&str>,
            _transcript: Option<&str>,
            _api_key: &SecretString,
        ) -> Option<AnalysisResult> {
            None
        }
    }

    #[async_trait]
    impl CallerLookup for Offline {
        async fn lookup(
            &self,
            _phone_number: &str,
            _credentials: &LookupCredentials,
        ) -> Option<CallerIdentity> {
            None
        }
    }

    async fn state() -> AppState {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let cache = Arc::new(Cache::in_memory(CacheConfig::default()));
        let enrichment = Arc::new(EnrichmentOrchestrator::new(
            db.clone(),
            cache.clone(),
            Arc::new(Offline),
            Arc::new(AddonRegistry::new()),
            Arc::new(TriggerDispatcher::new(db.clone(), reqwest::Client::new(), 1000)),
        ));
        let dispatcher = Arc::new(WebhookDispatcher::new(
            db.clone(),
            cache.clone(),
            Arc::new(Offline),
            enrichment,
            BackgroundTasks::new(),
        ));
        AppState {
            db,
            cache,
            dispatcher,
        }
    }

    async fn insert_call(db: &dyn Database, user_id: &str) -> Uuid {
        let call = CallRecord {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            webhook_id: "wh_1".into(),
            external_call_id: None,
            agent_phone_number: None,
            customer_phone_number: None,
            recording_url: None,
            ended_reason: None,
            summary: None,
            structured_data: None,
            raw_payload: serde_json::json!({}),
            caller: CallerIdentity::default(),
            duration_seconds: None,
            analysis: None,
            created_at: Utc::now(),
        };
        db.insert_call(&call).await.unwrap();
        call.id
    }

    async fn get_json(state: &AppState, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = router(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let state = state().await;
        let (status, body) = get_json(&state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn listing_is_cached_until_invalidated() {
        let state = state().await;
        insert_call(state.db.as_ref(), "u1").await;

        let (_, body) = get_json(&state, "/api/users/u1/calls").await;
        assert_eq!(body["calls"].as_array().unwrap().len(), 1);

        // Served from cache: the new row is not visible yet.
        insert_call(state.db.as_ref(), "u1").await;
        let (_, body) = get_json(&state, "/api/users/u1/calls?page=1").await;
        assert_eq!(body["calls"].as_array().unwrap().len(), 1);

        state.cache.invalidate_tenant("u1").await;
        let (_, body) = get_json(&state, "/api/users/u1/calls").await;
        assert_eq!(body["calls"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn call_is_scoped_to_tenant() {
        let state = state().await;
        let call_id = insert_call(state.db.as_ref(), "u1").await;

        let (status, body) = get_json(&state, &format!("/api/users/u1/calls/{call_id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], call_id.to_string());

        let (status, _) = get_json(&state, &format!("/api/users/u2/calls/{call_id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) =
            get_json(&state, &format!("/api/users/u2/calls/{call_id}/enrichment")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn analysis_view_reports_pending_analysis() {
        let state = state().await;
        let call_id = insert_call(state.db.as_ref(), "u1").await;
        let (status, body) =
            get_json(&state, &format!("/api/users/u1/calls/{call_id}/analysis")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["analysis_completed"], false);
        assert!(body["analysis"].is_null());
    }

    #[tokio::test]
    async fn summary_and_active_calls() {
        let state = state().await;
        insert_call(state.db.as_ref(), "u1").await;
        let (_, summary) = get_json(&state, "/api/users/u1/analysis/summary").await;
        assert_eq!(summary["total_calls"], 1);
        assert_eq!(summary["analyzed_calls"], 0);

        let (_, active) = get_json(&state, "/api/users/u1/active-calls").await;
        assert_eq!(active["count"], 0);
    }
}
