//! Webhook dispatcher: the entry point for inbound voice-platform events.
//!
//! Lifecycle events go to the active call tracker. Terminal events are
//! stored synchronously and acknowledged; enrichment is then spawned as a
//! detached background task whose outcome never affects the response.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::Cache;
use crate::clients::{CallerLookup, LookupCredentials};
use crate::error::{DatabaseError, WebhookError};
use crate::pipeline::active_calls::{ActiveCallTracker, TrackerOutcome};
use crate::pipeline::enrichment::{EnrichmentJob, EnrichmentOrchestrator};
use crate::pipeline::event::{LifecycleEvent, TerminalEvent, WebhookEvent, parse_event};
use crate::pipeline::tasks::BackgroundTasks;
use crate::store::{CallRecord, CallerIdentity, Database, UserSettings, Webhook, WebhookLog};

/// Result of a successfully handled webhook request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A lifecycle event was acknowledged.
    Lifecycle {
        status: String,
        outcome: TrackerOutcome,
    },
    /// A terminal event was stored as a new call record.
    Accepted { call_id: Uuid },
}

impl DispatchOutcome {
    /// JSON body returned to the voice platform.
    pub fn body(&self) -> Value {
        match self {
            Self::Lifecycle { status, .. } => json!({"received": true, "status": status}),
            Self::Accepted { call_id } => json!({"received": true, "call_id": call_id}),
        }
    }
}

pub struct WebhookDispatcher {
    db: Arc<dyn Database>,
    cache: Arc<Cache>,
    tracker: ActiveCallTracker,
    caller_lookup: Arc<dyn CallerLookup>,
    enrichment: Arc<EnrichmentOrchestrator>,
    tasks: BackgroundTasks,
}

impl WebhookDispatcher {
    pub fn new(
        db: Arc<dyn Database>,
        cache: Arc<Cache>,
        caller_lookup: Arc<dyn CallerLookup>,
        enrichment: Arc<EnrichmentOrchestrator>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            tracker: ActiveCallTracker::new(db.clone(), cache.clone()),
            db,
            cache,
            caller_lookup,
            enrichment,
            tasks,
        }
    }

    /// Handle one inbound request addressed to `webhook_id`.
    pub async fn handle(
        &self,
        webhook_id: &str,
        body: &str,
    ) -> Result<DispatchOutcome, WebhookError> {
        let webhook = match self.db.get_webhook(webhook_id).await? {
            Some(w) if w.is_active => w,
            Some(_) => {
                debug!(webhook_id, "Rejected event for inactive webhook");
                return Err(WebhookError::UnknownWebhook(webhook_id.to_string()));
            }
            None => {
                debug!(webhook_id, "Rejected event for unknown webhook");
                return Err(WebhookError::UnknownWebhook(webhook_id.to_string()));
            }
        };

        let event = match parse_event(body) {
            Ok(event) => event,
            Err(e) => {
                warn!(webhook_id, user_id = %webhook.user_id, error = %e, "Malformed webhook body");
                self.log_failure(&webhook, &e.to_string(), body).await;
                return Err(e);
            }
        };

        match event {
            WebhookEvent::Lifecycle(event) => self.handle_lifecycle(&webhook, event).await,
            WebhookEvent::Terminal(event) => self.handle_terminal(&webhook, event, body).await,
        }
    }

    async fn handle_lifecycle(
        &self,
        webhook: &Webhook,
        event: LifecycleEvent,
    ) -> Result<DispatchOutcome, WebhookError> {
        let outcome = self.tracker.apply(&webhook.user_id, &event).await?;
        Ok(DispatchOutcome::Lifecycle {
            status: event.status.as_str().to_string(),
            outcome,
        })
    }

    async fn handle_terminal(
        &self,
        webhook: &Webhook,
        event: TerminalEvent,
        body: &str,
    ) -> Result<DispatchOutcome, WebhookError> {
        match self.store_terminal(webhook, &event).await {
            Ok((call, settings)) => {
                let call_id = call.id;
                // The call row is committed; from here on the event is accepted.
                self.log_success(webhook, call_id, body).await;
                self.cache.invalidate_tenant(&webhook.user_id).await;
                info!(
                    call_id = %call_id,
                    user_id = %webhook.user_id,
                    webhook_id = %webhook.webhook_id,
                    duration = ?call.duration_seconds,
                    "Call stored; scheduling enrichment"
                );

                let job = EnrichmentJob {
                    authoritative: event.authoritative_fields(),
                    transcript: event.transcript,
                    call,
                    settings,
                };
                let enrichment = self.enrichment.clone();
                self.tasks.spawn("enrichment", async move {
                    enrichment.run(job).await;
                });

                Ok(DispatchOutcome::Accepted { call_id })
            }
            Err(e) => {
                error!(webhook_id = %webhook.webhook_id, user_id = %webhook.user_id, error = %e, "Failed to store call");
                self.log_failure(webhook, &e.to_string(), body).await;
                Err(WebhookError::Persistence(e))
            }
        }
    }

    /// Synchronous part of terminal handling: caller lookup and record write.
    async fn store_terminal(
        &self,
        webhook: &Webhook,
        event: &TerminalEvent,
    ) -> Result<(CallRecord, UserSettings), DatabaseError> {
        let settings = self
            .db
            .get_user_settings(&webhook.user_id)
            .await?
            .unwrap_or_else(|| UserSettings {
                user_id: webhook.user_id.clone(),
                ..Default::default()
            });

        let caller = self.identify_caller(&settings, event).await;

        let call = CallRecord {
            id: Uuid::new_v4(),
            user_id: webhook.user_id.clone(),
            webhook_id: webhook.webhook_id.clone(),
            external_call_id: event.external_call_id.clone(),
            agent_phone_number: event.agent_number.clone(),
            customer_phone_number: event.customer_number.clone(),
            recording_url: event.recording_url.clone(),
            ended_reason: event.ended_reason.clone(),
            summary: event.summary.clone(),
            structured_data: event.structured_data.clone(),
            raw_payload: event.raw.clone(),
            caller,
            duration_seconds: event.duration_seconds,
            analysis: None,
            created_at: Utc::now(),
        };
        self.db.insert_call(&call).await?;
        Ok((call, settings))
    }

    async fn identify_caller(&self, settings: &UserSettings, event: &TerminalEvent) -> CallerIdentity {
        let (Some(number), Some(credentials)) = (
            event.customer_number.as_deref(),
            LookupCredentials::from_settings(settings),
        ) else {
            return CallerIdentity::default();
        };
        self.caller_lookup
            .lookup(number, &credentials)
            .await
            .unwrap_or_default()
    }

    /// Best-effort success log. A committed call is never turned into an
    /// error response by a failed log write.
    async fn log_success(&self, webhook: &Webhook, call_id: Uuid, body: &str) {
        if let Err(e) = self
            .db
            .insert_webhook_log(&WebhookLog::success(webhook, body))
            .await
        {
            error!(call_id = %call_id, webhook_id = %webhook.webhook_id, error = %e, "Failed to write ingestion success log");
        }
    }

    /// Best-effort failure log; its own failure is only traced.
    async fn log_failure(&self, webhook: &Webhook, error: &str, body: &str) {
        if let Err(e) = self
            .db
            .insert_webhook_log(&WebhookLog::failure(webhook, error, body))
            .await
        {
            error!(webhook_id = %webhook.webhook_id, error = %e, "Failed to write ingestion failure log");
        }
    }
}
