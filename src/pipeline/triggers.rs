//! Scheduling trigger dispatcher.
//!
//! Delivers one normalized payload per call to every active trigger of the
//! tenant and records one delivery log row per trigger. Delivery is
//! fire-once: failures are visible only in the log table.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::store::{CallAnalysis, CallRecord, Database, LogStatus, SchedulingTrigger, TriggerDeliveryLog};

/// Event name sent in the payload and the `X-Event-Type` header.
pub const APPOINTMENT_SCHEDULED: &str = "appointment.scheduled";

/// Result of a single POST.
#[derive(Debug)]
struct Delivery {
    http_status: Option<u16>,
    body: Option<String>,
    error: Option<DeliveryError>,
}

pub struct TriggerDispatcher {
    db: Arc<dyn Database>,
    client: reqwest::Client,
    body_limit: usize,
}

impl TriggerDispatcher {
    pub fn new(db: Arc<dyn Database>, client: reqwest::Client, body_limit: usize) -> Self {
        Self {
            db,
            client,
            body_limit,
        }
    }

    /// Deliver to all active triggers. `enriched` is attached for triggers that
    /// ask for it. Returns the number of delivery log rows written.
    pub async fn dispatch(
        &self,
        call: &CallRecord,
        analysis: &CallAnalysis,
        enriched: Option<&Value>,
    ) -> usize {
        let triggers = match self.db.list_active_triggers(&call.user_id).await {
            Ok(t) => t,
            Err(e) => {
                error!(call_id = %call.id, user_id = %call.user_id, error = %e, "Failed to load triggers");
                return 0;
            }
        };
        if triggers.is_empty() {
            debug!(call_id = %call.id, "No active scheduling triggers");
            return 0;
        }

        let payload = build_payload(call, analysis);
        let deliveries = triggers
            .iter()
            .map(|trigger| self.deliver_and_log(call, trigger, payload.clone(), enriched));
        let written = join_all(deliveries).await.into_iter().filter(|ok| *ok).count();

        info!(
            call_id = %call.id,
            user_id = %call.user_id,
            triggers = triggers.len(),
            logged = written,
            "Scheduling triggers dispatched"
        );
        written
    }

    async fn deliver_and_log(
        &self,
        call: &CallRecord,
        trigger: &SchedulingTrigger,
        mut payload: Value,
        enriched: Option<&Value>,
    ) -> bool {
        if trigger.send_enriched_data
            && let Some(data) = enriched
        {
            payload["enriched_data"] = data.clone();
        }

        let delivery = self.post(&trigger.destination_url, call.id, &payload).await;
        let status = if delivery.error.is_none() {
            LogStatus::Success
        } else {
            LogStatus::Error
        };
        match &delivery.error {
            None => debug!(trigger_id = %trigger.id, call_id = %call.id, "Trigger delivered"),
            Some(e) => warn!(trigger_id = %trigger.id, call_id = %call.id, error = %e, "Trigger delivery failed"),
        }

        let log = TriggerDeliveryLog {
            id: Uuid::new_v4(),
            trigger_id: trigger.id,
            call_id: call.id,
            user_id: call.user_id.clone(),
            status,
            http_status: delivery.http_status,
            response_body: delivery.body,
            error_message: delivery.error.map(|e| e.to_string()),
            payload,
            created_at: Utc::now(),
        };
        match self.db.insert_trigger_log(&log).await {
            Ok(()) => true,
            Err(e) => {
                error!(trigger_id = %trigger.id, call_id = %call.id, error = %e, "Failed to write delivery log");
                false
            }
        }
    }

    async fn post(&self, url: &str, call_id: Uuid, payload: &Value) -> Delivery {
        let resp = self
            .client
            .post(url)
            .header("X-Event-Type", APPOINTMENT_SCHEDULED)
            .header("X-Call-Id", call_id.to_string())
            .json(payload)
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                return Delivery {
                    http_status: None,
                    body: None,
                    error: Some(DeliveryError::Transport {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }),
                };
            }
        };

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let body = truncate_chars(&body, self.body_limit);
        Delivery {
            http_status: Some(status.as_u16()),
            body: Some(body),
            error: (!status.is_success()).then(|| DeliveryError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}

/// Normalized payload for one call.
pub fn build_payload(call: &CallRecord, analysis: &CallAnalysis) -> Value {
    let appt = &analysis.appointment;
    json!({
        "event": APPOINTMENT_SCHEDULED,
        "call_id": call.id,
        "customer_name": analysis.customer_name.as_deref().unwrap_or("Unknown"),
        "customer_email": analysis.customer_email,
        "customer_phone": call.customer_phone_number,
        "called_number": call.agent_phone_number,
        "appointment_date": appt.date,
        "appointment_time": appt.time,
        "appointment_datetime": appt.datetime,
        "appointment_type": appt.kind,
        "appointment_notes": appt.notes,
        "intent": analysis.intent,
        "sentiment": analysis.sentiment,
        "outcome": analysis.outcome,
        "summary": call.summary,
        "recording_url": call.recording_url,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
