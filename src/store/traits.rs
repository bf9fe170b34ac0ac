//! Unified `Database` trait: the persistence gateway for the call pipeline.
//!
//! Row types live here next to the trait; the libSQL backend maps them to
//! tables in `migrations.rs`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;

// ── Tenancy ─────────────────────────────────────────────────────────

/// A tenant-owned inbound webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: Uuid,
    /// Public identifier used in the inbound URL.
    pub webhook_id: String,
    pub user_id: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-tenant credentials for external collaborators.
#[derive(Debug, Clone, Default)]
pub struct UserSettings {
    pub user_id: String,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<SecretString>,
    /// Key for the Call Analysis Client. Analysis is skipped without it.
    pub llm_api_key: Option<SecretString>,
}

/// Outcome recorded in append-only log tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            _ => Self::Error,
        }
    }
}

/// One row per inbound webhook request that reached a known webhook.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookLog {
    pub id: Uuid,
    pub webhook_id: String,
    pub user_id: String,
    pub status: LogStatus,
    pub error_message: Option<String>,
    /// Raw request body as received.
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl WebhookLog {
    pub fn success(webhook: &Webhook, payload: &str) -> Self {
        Self::new(webhook, LogStatus::Success, None, payload)
    }

    pub fn failure(webhook: &Webhook, error: impl Into<String>, payload: &str) -> Self {
        Self::new(webhook, LogStatus::Error, Some(error.into()), payload)
    }

    fn new(webhook: &Webhook, status: LogStatus, error: Option<String>, payload: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            webhook_id: webhook.webhook_id.clone(),
            user_id: webhook.user_id.clone(),
            status,
            error_message: error,
            payload: payload.to_string(),
            created_at: Utc::now(),
        }
    }
}

// ── Calls ───────────────────────────────────────────────────────────

/// Phone-number metadata from the Caller Identification Client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub caller_name: Option<String>,
    pub caller_type: Option<String>,
    pub carrier_name: Option<String>,
    pub line_type: Option<String>,
}

/// Appointment fields, from structured data or AI analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub date: Option<String>,
    pub time: Option<String>,
    /// Epoch seconds (UTC) when date and time both parse.
    pub datetime: Option<i64>,
    pub kind: Option<String>,
    pub notes: Option<String>,
}

impl Appointment {
    /// Date and time are both present.
    pub fn is_scheduled(&self) -> bool {
        self.date.is_some() && self.time.is_some()
    }
}

/// Fields written by the Enrichment Orchestrator in a single update.
///
/// A record either carries a full `CallAnalysis` or none at all, so partial
/// analysis state cannot be represented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallAnalysis {
    pub intent: String,
    pub sentiment: String,
    pub outcome: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub appointment: Appointment,
    pub analyzed_at: DateTime<Utc>,
}

/// One per terminal call event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: Uuid,
    pub user_id: String,
    pub webhook_id: String,
    pub external_call_id: Option<String>,
    pub agent_phone_number: Option<String>,
    pub customer_phone_number: Option<String>,
    pub recording_url: Option<String>,
    pub ended_reason: Option<String>,
    pub summary: Option<String>,
    pub structured_data: Option<serde_json::Value>,
    pub raw_payload: serde_json::Value,
    pub caller: CallerIdentity,
    pub duration_seconds: Option<i64>,
    pub analysis: Option<CallAnalysis>,
    pub created_at: DateTime<Utc>,
}

impl CallRecord {
    pub fn analysis_completed(&self) -> bool {
        self.analysis.is_some()
    }
}

/// Live lifecycle states. `ended` is represented by the absence of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LiveStatus {
    Ringing,
    InProgress,
    Forwarding,
}

impl LiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ringing => "ringing",
            Self::InProgress => "in-progress",
            Self::Forwarding => "forwarding",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ringing" => Some(Self::Ringing),
            "in-progress" => Some(Self::InProgress),
            "forwarding" => Some(Self::Forwarding),
            _ => None,
        }
    }
}

/// A call currently in a live lifecycle state, keyed by (user_id, external_call_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveCall {
    pub user_id: String,
    pub external_call_id: String,
    pub status: LiveStatus,
    pub customer_number: Option<String>,
    pub agent_number: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// ── Keywords ────────────────────────────────────────────────────────

/// Running keyword statistics per (user_id, keyword).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordAggregate {
    pub user_id: String,
    pub keyword: String,
    pub total_count: i64,
    pub positive_count: i64,
    pub neutral_count: i64,
    pub negative_count: i64,
    pub avg_sentiment: f64,
    pub last_detected_at: DateTime<Utc>,
}

// ── Triggers ────────────────────────────────────────────────────────

/// A tenant-configured outbound destination fired on booked appointments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingTrigger {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub destination_url: String,
    pub is_active: bool,
    /// Attach the call's add-on enrichment result to the payload.
    pub send_enriched_data: bool,
    pub created_at: DateTime<Utc>,
}

/// One row per (trigger, call) delivery attempt.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerDeliveryLog {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub call_id: Uuid,
    pub user_id: String,
    pub status: LogStatus,
    pub http_status: Option<u16>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ── Add-ons ─────────────────────────────────────────────────────────

/// A tenant's add-on enablement and configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonSetting {
    pub user_id: String,
    pub addon_type: String,
    pub is_enabled: bool,
    pub config: serde_json::Value,
}

/// One row per add-on execution per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonResult {
    pub id: Uuid,
    pub call_id: Uuid,
    pub user_id: String,
    pub addon_type: String,
    pub status: LogStatus,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

// ── Aggregates ──────────────────────────────────────────────────────

/// Tenant-wide analysis totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisCounts {
    pub total_calls: i64,
    pub analyzed_calls: i64,
    pub by_intent: BTreeMap<String, i64>,
    pub by_sentiment: BTreeMap<String, i64>,
}

// ── Trait ───────────────────────────────────────────────────────────

/// Backend-agnostic persistence gateway.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Webhooks & settings ─────────────────────────────────────────

    /// Register a webhook endpoint for a tenant.
    async fn insert_webhook(&self, webhook: &Webhook) -> Result<(), DatabaseError>;

    /// Look up a webhook by its public identifier.
    async fn get_webhook(&self, webhook_id: &str) -> Result<Option<Webhook>, DatabaseError>;

    /// Insert or replace a tenant's credential settings.
    async fn upsert_user_settings(&self, settings: &UserSettings) -> Result<(), DatabaseError>;

    async fn get_user_settings(&self, user_id: &str) -> Result<Option<UserSettings>, DatabaseError>;

    /// Append an ingestion log row.
    async fn insert_webhook_log(&self, log: &WebhookLog) -> Result<(), DatabaseError>;

    /// Ingestion logs for a webhook, most recent first.
    async fn list_webhook_logs(&self, webhook_id: &str) -> Result<Vec<WebhookLog>, DatabaseError>;

    // ── Calls ───────────────────────────────────────────────────────

    async fn insert_call(&self, call: &CallRecord) -> Result<(), DatabaseError>;

    async fn get_call(&self, id: Uuid) -> Result<Option<CallRecord>, DatabaseError>;

    /// A tenant's calls, most recent first.
    async fn list_calls(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CallRecord>, DatabaseError>;

    /// Call totals and intent/sentiment breakdown of analyzed calls.
    async fn analysis_counts(&self, user_id: &str) -> Result<AnalysisCounts, DatabaseError>;

    /// Write all analysis fields in one statement and mark the call analyzed.
    /// Returns false if the call does not exist or was already analyzed.
    async fn apply_call_analysis(
        &self,
        id: Uuid,
        analysis: &CallAnalysis,
    ) -> Result<bool, DatabaseError>;

    // ── Active calls ────────────────────────────────────────────────

    /// Insert-or-replace keyed by (user_id, external_call_id).
    async fn upsert_active_call(&self, call: &ActiveCall) -> Result<(), DatabaseError>;

    /// Returns true if a row was deleted.
    async fn delete_active_call(
        &self,
        user_id: &str,
        external_call_id: &str,
    ) -> Result<bool, DatabaseError>;

    async fn get_active_call(
        &self,
        user_id: &str,
        external_call_id: &str,
    ) -> Result<Option<ActiveCall>, DatabaseError>;

    async fn list_active_calls(&self, user_id: &str) -> Result<Vec<ActiveCall>, DatabaseError>;

    // ── Keywords ────────────────────────────────────────────────────

    async fn get_keyword(
        &self,
        user_id: &str,
        keyword: &str,
    ) -> Result<Option<KeywordAggregate>, DatabaseError>;

    /// Insert or overwrite the row for (user_id, keyword).
    async fn upsert_keyword(&self, aggregate: &KeywordAggregate) -> Result<(), DatabaseError>;

    /// Top keywords by total count.
    async fn list_keywords(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<KeywordAggregate>, DatabaseError>;

    // ── Triggers ────────────────────────────────────────────────────

    async fn insert_trigger(&self, trigger: &SchedulingTrigger) -> Result<(), DatabaseError>;

    async fn list_active_triggers(
        &self,
        user_id: &str,
    ) -> Result<Vec<SchedulingTrigger>, DatabaseError>;

    async fn insert_trigger_log(&self, log: &TriggerDeliveryLog) -> Result<(), DatabaseError>;

    async fn list_trigger_logs(&self, call_id: Uuid)
    -> Result<Vec<TriggerDeliveryLog>, DatabaseError>;

    // ── Add-ons ─────────────────────────────────────────────────────

    async fn upsert_addon_setting(&self, setting: &AddonSetting) -> Result<(), DatabaseError>;

    async fn list_enabled_addons(&self, user_id: &str) -> Result<Vec<AddonSetting>, DatabaseError>;

    async fn insert_addon_result(&self, result: &AddonResult) -> Result<(), DatabaseError>;

    /// Add-on results for a call, oldest first.
    async fn list_addon_results(&self, call_id: Uuid) -> Result<Vec<AddonResult>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_status_roundtrip() {
        for status in [LiveStatus::Ringing, LiveStatus::InProgress, LiveStatus::Forwarding] {
            assert_eq!(LiveStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LiveStatus::parse("ended"), None);
        assert_eq!(LiveStatus::parse("queued"), None);
    }

    #[test]
    fn appointment_is_scheduled_needs_date_and_time() {
        let mut appt = Appointment {
            date: Some("2026-10-17".into()),
            ..Default::default()
        };
        assert!(!appt.is_scheduled());
        appt.time = Some("14:00".into());
        assert!(appt.is_scheduled());
    }

    #[test]
    fn log_status_unknown_maps_to_error() {
        assert_eq!(LogStatus::parse("success"), LogStatus::Success);
        assert_eq!(LogStatus::parse("weird"), LogStatus::Error);
    }
}
