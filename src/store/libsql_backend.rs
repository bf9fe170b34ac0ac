//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    ActiveCall, AddonResult, AnalysisCounts, AddonSetting, Appointment, CallAnalysis, CallRecord, CallerIdentity,
    Database, KeywordAggregate, LiveStatus, LogStatus, SchedulingTrigger, TriggerDeliveryLog,
    UserSettings, Webhook, WebhookLog,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run raw SQL against the store. Tests use it to install failing triggers.
    #[cfg(test)]
    pub(crate) async fn execute_batch(&self, sql: &str) {
        self.conn.execute_batch(sql).await.unwrap();
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_json(s: Option<String>) -> Option<serde_json::Value> {
    s.filter(|s| !s.is_empty())
        .and_then(|s| serde_json::from_str(&s).ok())
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

fn opt_secret(s: &Option<SecretString>) -> libsql::Value {
    opt_text(s.as_ref().map(|s| s.expose_secret()))
}

fn bool_int(b: bool) -> i64 {
    i64::from(b)
}

fn json_text(v: &serde_json::Value) -> Result<String, DatabaseError> {
    serde_json::to_string(v).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// Map a libsql Row to a CallRecord. Column order matches CALL_COLUMNS.
fn row_to_call(row: &libsql::Row) -> Result<CallRecord, libsql::Error> {
    let id_str: String = row.get(0)?;
    let raw_payload_str: String = row.get(10)?;
    let analysis_completed = row.get::<i64>(26).unwrap_or(0) != 0;
    let analyzed_at_str: Option<String> = row.get(27).ok();
    let created_str: String = row.get(28)?;

    let analysis = if analysis_completed {
        Some(CallAnalysis {
            intent: row.get(16).unwrap_or_else(|_| "Unknown".to_string()),
            sentiment: row.get(17).unwrap_or_else(|_| "Neutral".to_string()),
            outcome: row.get(18).unwrap_or_else(|_| "Unknown".to_string()),
            customer_name: row.get(19).ok(),
            customer_email: row.get(20).ok(),
            appointment: Appointment {
                date: row.get(21).ok(),
                time: row.get(22).ok(),
                datetime: row.get::<i64>(23).ok(),
                kind: row.get(24).ok(),
                notes: row.get(25).ok(),
            },
            analyzed_at: parse_optional_datetime(&analyzed_at_str).unwrap_or_else(Utc::now),
        })
    } else {
        None
    };

    Ok(CallRecord {
        id: parse_uuid(&id_str),
        user_id: row.get(1)?,
        webhook_id: row.get(2)?,
        external_call_id: row.get(3).ok(),
        agent_phone_number: row.get(4).ok(),
        customer_phone_number: row.get(5).ok(),
        recording_url: row.get(6).ok(),
        ended_reason: row.get(7).ok(),
        summary: row.get(8).ok(),
        structured_data: parse_json(row.get(9).ok()),
        raw_payload: serde_json::from_str(&raw_payload_str).unwrap_or(serde_json::Value::Null),
        caller: CallerIdentity {
            caller_name: row.get(11).ok(),
            caller_type: row.get(12).ok(),
            carrier_name: row.get(13).ok(),
            line_type: row.get(14).ok(),
        },
        duration_seconds: row.get::<i64>(15).ok(),
        analysis,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_webhook(row: &libsql::Row) -> Result<Webhook, libsql::Error> {
    let id_str: String = row.get(0)?;
    let created_str: String = row.get(5)?;
    Ok(Webhook {
        id: parse_uuid(&id_str),
        webhook_id: row.get(1)?,
        user_id: row.get(2)?,
        name: row.get(3).unwrap_or_default(),
        is_active: row.get::<i64>(4).unwrap_or(0) != 0,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_webhook_log(row: &libsql::Row) -> Result<WebhookLog, libsql::Error> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(6)?;
    Ok(WebhookLog {
        id: parse_uuid(&id_str),
        webhook_id: row.get(1)?,
        user_id: row.get(2)?,
        status: LogStatus::parse(&status_str),
        error_message: row.get(4).ok(),
        payload: row.get(5)?,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_active_call(row: &libsql::Row) -> Result<ActiveCall, libsql::Error> {
    let status_str: String = row.get(2)?;
    let started_str: Option<String> = row.get(5).ok();
    let updated_str: String = row.get(6)?;
    Ok(ActiveCall {
        user_id: row.get(0)?,
        external_call_id: row.get(1)?,
        // Only live statuses are ever written; fall back rather than fail the listing.
        status: LiveStatus::parse(&status_str).unwrap_or(LiveStatus::InProgress),
        customer_number: row.get(3).ok(),
        agent_number: row.get(4).ok(),
        started_at: parse_optional_datetime(&started_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_keyword(row: &libsql::Row) -> Result<KeywordAggregate, libsql::Error> {
    let last_str: String = row.get(7)?;
    Ok(KeywordAggregate {
        user_id: row.get(0)?,
        keyword: row.get(1)?,
        total_count: row.get::<i64>(2).unwrap_or(0),
        positive_count: row.get::<i64>(3).unwrap_or(0),
        neutral_count: row.get::<i64>(4).unwrap_or(0),
        negative_count: row.get::<i64>(5).unwrap_or(0),
        avg_sentiment: row.get::<f64>(6).unwrap_or(0.0),
        last_detected_at: parse_datetime(&last_str),
    })
}

fn row_to_trigger(row: &libsql::Row) -> Result<SchedulingTrigger, libsql::Error> {
    let id_str: String = row.get(0)?;
    let created_str: String = row.get(6)?;
    Ok(SchedulingTrigger {
        id: parse_uuid(&id_str),
        user_id: row.get(1)?,
        name: row.get(2).unwrap_or_default(),
        destination_url: row.get(3)?,
        is_active: row.get::<i64>(4).unwrap_or(0) != 0,
        send_enriched_data: row.get::<i64>(5).unwrap_or(0) != 0,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_trigger_log(row: &libsql::Row) -> Result<TriggerDeliveryLog, libsql::Error> {
    let id_str: String = row.get(0)?;
    let trigger_str: String = row.get(1)?;
    let call_str: String = row.get(2)?;
    let status_str: String = row.get(4)?;
    let payload_str: String = row.get(8)?;
    let created_str: String = row.get(9)?;
    Ok(TriggerDeliveryLog {
        id: parse_uuid(&id_str),
        trigger_id: parse_uuid(&trigger_str),
        call_id: parse_uuid(&call_str),
        user_id: row.get(3)?,
        status: LogStatus::parse(&status_str),
        http_status: row.get::<i64>(5).ok().map(|s| s as u16),
        response_body: row.get(6).ok(),
        error_message: row.get(7).ok(),
        payload: serde_json::from_str(&payload_str).unwrap_or(serde_json::Value::Null),
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_addon_setting(row: &libsql::Row) -> Result<AddonSetting, libsql::Error> {
    Ok(AddonSetting {
        user_id: row.get(0)?,
        addon_type: row.get(1)?,
        is_enabled: row.get::<i64>(2).unwrap_or(0) != 0,
        config: parse_json(row.get(3).ok()).unwrap_or_else(|| serde_json::json!({})),
    })
}

fn row_to_addon_result(row: &libsql::Row) -> Result<AddonResult, libsql::Error> {
    let id_str: String = row.get(0)?;
    let call_str: String = row.get(1)?;
    let status_str: String = row.get(4)?;
    let created_str: String = row.get(8)?;
    Ok(AddonResult {
        id: parse_uuid(&id_str),
        call_id: parse_uuid(&call_str),
        user_id: row.get(2)?,
        addon_type: row.get(3)?,
        status: LogStatus::parse(&status_str),
        result: parse_json(row.get(5).ok()),
        error_message: row.get(6).ok(),
        duration_ms: row.get::<i64>(7).unwrap_or(0),
        created_at: parse_datetime(&created_str),
    })
}

/// Collect all rows of a query through a mapper.
async fn collect_rows<T>(
    mut rows: libsql::Rows,
    op: &str,
    map: fn(&libsql::Row) -> Result<T, libsql::Error>,
) -> Result<Vec<T>, DatabaseError> {
    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
    {
        out.push(map(&row).map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?);
    }
    Ok(out)
}

/// Read at most one row through a mapper.
async fn first_row<T>(
    mut rows: libsql::Rows,
    op: &str,
    map: fn(&libsql::Row) -> Result<T, libsql::Error>,
) -> Result<Option<T>, DatabaseError> {
    match rows.next().await {
        Ok(Some(row)) => map(&row)
            .map(Some)
            .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}"))),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
    }
}

// ── Trait implementation ────────────────────────────────────────────

const WEBHOOK_COLUMNS: &str = "id, webhook_id, user_id, name, is_active, created_at";

const WEBHOOK_LOG_COLUMNS: &str =
    "id, webhook_id, user_id, status, error_message, payload, created_at";

const CALL_COLUMNS: &str = "id, user_id, webhook_id, external_call_id, agent_phone_number, \
    customer_phone_number, recording_url, ended_reason, summary, structured_data, raw_payload, \
    caller_name, caller_type, carrier_name, line_type, duration_seconds, intent, sentiment, \
    outcome, customer_name, customer_email, appointment_date, appointment_time, \
    appointment_datetime, appointment_type, appointment_notes, analysis_completed, analyzed_at, \
    created_at";

const ACTIVE_CALL_COLUMNS: &str =
    "user_id, external_call_id, status, customer_number, agent_number, started_at, updated_at";

const KEYWORD_COLUMNS: &str = "user_id, keyword, total_count, positive_count, neutral_count, \
    negative_count, avg_sentiment, last_detected_at";

const TRIGGER_COLUMNS: &str =
    "id, user_id, name, destination_url, is_active, send_enriched_data, created_at";

const TRIGGER_LOG_COLUMNS: &str = "id, trigger_id, call_id, user_id, status, http_status, \
    response_body, error_message, payload, created_at";

const ADDON_SETTING_COLUMNS: &str = "user_id, addon_type, is_enabled, config";

const ADDON_RESULT_COLUMNS: &str =
    "id, call_id, user_id, addon_type, status, result, error_message, duration_ms, created_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Webhooks & settings ─────────────────────────────────────────

    async fn insert_webhook(&self, webhook: &Webhook) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO webhooks (id, webhook_id, user_id, name, is_active, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    webhook.id.to_string(),
                    webhook.webhook_id.clone(),
                    webhook.user_id.clone(),
                    webhook.name.clone(),
                    bool_int(webhook.is_active),
                    webhook.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_webhook: {e}")))?;
        debug!(webhook_id = %webhook.webhook_id, user_id = %webhook.user_id, "Webhook inserted");
        Ok(())
    }

    async fn get_webhook(&self, webhook_id: &str) -> Result<Option<Webhook>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE webhook_id = ?1"),
                params![webhook_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_webhook: {e}")))?;
        first_row(rows, "get_webhook", row_to_webhook).await
    }

    async fn upsert_user_settings(&self, settings: &UserSettings) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO user_settings (user_id, twilio_account_sid, twilio_auth_token, llm_api_key, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (user_id) DO UPDATE SET
                    twilio_account_sid = excluded.twilio_account_sid,
                    twilio_auth_token = excluded.twilio_auth_token,
                    llm_api_key = excluded.llm_api_key,
                    updated_at = excluded.updated_at",
                params![
                    settings.user_id.clone(),
                    opt_text(settings.twilio_account_sid.as_deref()),
                    opt_secret(&settings.twilio_auth_token),
                    opt_secret(&settings.llm_api_key),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_user_settings: {e}")))?;
        Ok(())
    }

    async fn get_user_settings(&self, user_id: &str) -> Result<Option<UserSettings>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                "SELECT user_id, twilio_account_sid, twilio_auth_token, llm_api_key FROM user_settings WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user_settings: {e}")))?;

        fn map(row: &libsql::Row) -> Result<UserSettings, libsql::Error> {
            Ok(UserSettings {
                user_id: row.get(0)?,
                twilio_account_sid: row.get::<String>(1).ok().filter(|s| !s.is_empty()),
                twilio_auth_token: row
                    .get::<String>(2)
                    .ok()
                    .filter(|s| !s.is_empty())
                    .map(SecretString::from),
                llm_api_key: row
                    .get::<String>(3)
                    .ok()
                    .filter(|s| !s.is_empty())
                    .map(SecretString::from),
            })
        }
        first_row(rows, "get_user_settings", map).await
    }

    async fn insert_webhook_log(&self, log: &WebhookLog) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO webhook_logs (id, webhook_id, user_id, status, error_message, payload, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    log.id.to_string(),
                    log.webhook_id.clone(),
                    log.user_id.clone(),
                    log.status.as_str(),
                    opt_text(log.error_message.as_deref()),
                    log.payload.clone(),
                    log.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_webhook_log: {e}")))?;
        Ok(())
    }

    async fn list_webhook_logs(&self, webhook_id: &str) -> Result<Vec<WebhookLog>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {WEBHOOK_LOG_COLUMNS} FROM webhook_logs WHERE webhook_id = ?1 ORDER BY created_at DESC"
                ),
                params![webhook_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_webhook_logs: {e}")))?;
        collect_rows(rows, "list_webhook_logs", row_to_webhook_log).await
    }

    // ── Calls ───────────────────────────────────────────────────────

    async fn insert_call(&self, call: &CallRecord) -> Result<(), DatabaseError> {
        let structured = match &call.structured_data {
            Some(v) => Some(json_text(v)?),
            None => None,
        };
        let raw_payload = json_text(&call.raw_payload)?;
        let analysis = call.analysis.as_ref();
        let appointment = analysis.map(|a| &a.appointment);

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO calls ({CALL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29)"
                ),
                params![
                    call.id.to_string(),
                    call.user_id.clone(),
                    call.webhook_id.clone(),
                    opt_text(call.external_call_id.as_deref()),
                    opt_text(call.agent_phone_number.as_deref()),
                    opt_text(call.customer_phone_number.as_deref()),
                    opt_text(call.recording_url.as_deref()),
                    opt_text(call.ended_reason.as_deref()),
                    opt_text(call.summary.as_deref()),
                    opt_text_owned(structured),
                    raw_payload,
                    opt_text(call.caller.caller_name.as_deref()),
                    opt_text(call.caller.caller_type.as_deref()),
                    opt_text(call.caller.carrier_name.as_deref()),
                    opt_text(call.caller.line_type.as_deref()),
                    opt_int(call.duration_seconds),
                    opt_text(analysis.map(|a| a.intent.as_str())),
                    opt_text(analysis.map(|a| a.sentiment.as_str())),
                    opt_text(analysis.map(|a| a.outcome.as_str())),
                    opt_text(analysis.and_then(|a| a.customer_name.as_deref())),
                    opt_text(analysis.and_then(|a| a.customer_email.as_deref())),
                    opt_text(appointment.and_then(|a| a.date.as_deref())),
                    opt_text(appointment.and_then(|a| a.time.as_deref())),
                    opt_int(appointment.and_then(|a| a.datetime)),
                    opt_text(appointment.and_then(|a| a.kind.as_deref())),
                    opt_text(appointment.and_then(|a| a.notes.as_deref())),
                    bool_int(analysis.is_some()),
                    opt_text_owned(analysis.map(|a| a.analyzed_at.to_rfc3339())),
                    call.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_call: {e}")))?;

        debug!(call_id = %call.id, user_id = %call.user_id, "Call inserted into DB");
        Ok(())
    }

    async fn get_call(&self, id: Uuid) -> Result<Option<CallRecord>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_call: {e}")))?;
        first_row(rows, "get_call", row_to_call).await
    }

    async fn list_calls(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CallRecord>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CALL_COLUMNS} FROM calls WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
                ),
                params![user_id, limit as i64, offset as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_calls: {e}")))?;
        collect_rows(rows, "list_calls", row_to_call).await
    }

    async fn analysis_counts(&self, user_id: &str) -> Result<AnalysisCounts, DatabaseError> {
        let mut counts = AnalysisCounts::default();

        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*), COALESCE(SUM(analysis_completed), 0) FROM calls WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("analysis_counts: {e}")))?;
        if let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("analysis_counts: {e}")))?
        {
            counts.total_calls = row.get::<i64>(0).unwrap_or(0);
            counts.analyzed_calls = row.get::<i64>(1).unwrap_or(0);
        }

        for (column, target) in [
            ("intent", &mut counts.by_intent),
            ("sentiment", &mut counts.by_sentiment),
        ] {
            let mut rows = self
                .conn()
                .query(
                    &format!(
                        "SELECT {column}, COUNT(*) FROM calls WHERE user_id = ?1 AND analysis_completed = 1 GROUP BY {column}"
                    ),
                    params![user_id],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("analysis_counts {column}: {e}")))?;
            while let Some(row) = rows
                .next()
                .await
                .map_err(|e| DatabaseError::Query(format!("analysis_counts {column}: {e}")))?
            {
                let label: String = row.get(0).unwrap_or_else(|_| "Unknown".to_string());
                target.insert(label, row.get::<i64>(1).unwrap_or(0));
            }
        }

        Ok(counts)
    }

    async fn apply_call_analysis(
        &self,
        id: Uuid,
        analysis: &CallAnalysis,
    ) -> Result<bool, DatabaseError> {
        let appt = &analysis.appointment;
        let changed = self
            .conn()
            .execute(
                "UPDATE calls SET
                    intent = ?1, sentiment = ?2, outcome = ?3,
                    customer_name = ?4, customer_email = ?5,
                    appointment_date = ?6, appointment_time = ?7, appointment_datetime = ?8,
                    appointment_type = ?9, appointment_notes = ?10,
                    analysis_completed = 1, analyzed_at = ?11
                 WHERE id = ?12 AND analysis_completed = 0",
                params![
                    analysis.intent.clone(),
                    analysis.sentiment.clone(),
                    analysis.outcome.clone(),
                    opt_text(analysis.customer_name.as_deref()),
                    opt_text(analysis.customer_email.as_deref()),
                    opt_text(appt.date.as_deref()),
                    opt_text(appt.time.as_deref()),
                    opt_int(appt.datetime),
                    opt_text(appt.kind.as_deref()),
                    opt_text(appt.notes.as_deref()),
                    analysis.analyzed_at.to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("apply_call_analysis: {e}")))?;

        debug!(call_id = %id, applied = changed > 0, intent = %analysis.intent, "Call analysis written");
        Ok(changed > 0)
    }

    // ── Active calls ────────────────────────────────────────────────

    async fn upsert_active_call(&self, call: &ActiveCall) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO active_calls ({ACTIVE_CALL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    call.user_id.clone(),
                    call.external_call_id.clone(),
                    call.status.as_str(),
                    opt_text(call.customer_number.as_deref()),
                    opt_text(call.agent_number.as_deref()),
                    opt_text_owned(call.started_at.map(|t| t.to_rfc3339())),
                    call.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_active_call: {e}")))?;
        Ok(())
    }

    async fn delete_active_call(
        &self,
        user_id: &str,
        external_call_id: &str,
    ) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "DELETE FROM active_calls WHERE user_id = ?1 AND external_call_id = ?2",
                params![user_id, external_call_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_active_call: {e}")))?;
        Ok(changed > 0)
    }

    async fn get_active_call(
        &self,
        user_id: &str,
        external_call_id: &str,
    ) -> Result<Option<ActiveCall>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ACTIVE_CALL_COLUMNS} FROM active_calls WHERE user_id = ?1 AND external_call_id = ?2"
                ),
                params![user_id, external_call_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_active_call: {e}")))?;
        first_row(rows, "get_active_call", row_to_active_call).await
    }

    async fn list_active_calls(&self, user_id: &str) -> Result<Vec<ActiveCall>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ACTIVE_CALL_COLUMNS} FROM active_calls WHERE user_id = ?1 ORDER BY updated_at DESC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_active_calls: {e}")))?;
        collect_rows(rows, "list_active_calls", row_to_active_call).await
    }

    // ── Keywords ────────────────────────────────────────────────────

    async fn get_keyword(
        &self,
        user_id: &str,
        keyword: &str,
    ) -> Result<Option<KeywordAggregate>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {KEYWORD_COLUMNS} FROM keyword_aggregates WHERE user_id = ?1 AND keyword = ?2"
                ),
                params![user_id, keyword],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_keyword: {e}")))?;
        first_row(rows, "get_keyword", row_to_keyword).await
    }

    async fn upsert_keyword(&self, aggregate: &KeywordAggregate) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO keyword_aggregates ({KEYWORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    aggregate.user_id.clone(),
                    aggregate.keyword.clone(),
                    aggregate.total_count,
                    aggregate.positive_count,
                    aggregate.neutral_count,
                    aggregate.negative_count,
                    aggregate.avg_sentiment,
                    aggregate.last_detected_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_keyword: {e}")))?;
        Ok(())
    }

    async fn list_keywords(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<KeywordAggregate>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {KEYWORD_COLUMNS} FROM keyword_aggregates WHERE user_id = ?1 ORDER BY total_count DESC, keyword ASC LIMIT ?2"
                ),
                params![user_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_keywords: {e}")))?;
        collect_rows(rows, "list_keywords", row_to_keyword).await
    }

    // ── Triggers ────────────────────────────────────────────────────

    async fn insert_trigger(&self, trigger: &SchedulingTrigger) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO scheduling_triggers ({TRIGGER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    trigger.id.to_string(),
                    trigger.user_id.clone(),
                    trigger.name.clone(),
                    trigger.destination_url.clone(),
                    bool_int(trigger.is_active),
                    bool_int(trigger.send_enriched_data),
                    trigger.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_trigger: {e}")))?;
        Ok(())
    }

    async fn list_active_triggers(
        &self,
        user_id: &str,
    ) -> Result<Vec<SchedulingTrigger>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TRIGGER_COLUMNS} FROM scheduling_triggers WHERE user_id = ?1 AND is_active = 1 ORDER BY created_at ASC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_active_triggers: {e}")))?;
        collect_rows(rows, "list_active_triggers", row_to_trigger).await
    }

    async fn insert_trigger_log(&self, log: &TriggerDeliveryLog) -> Result<(), DatabaseError> {
        let payload = json_text(&log.payload)?;
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO trigger_delivery_logs ({TRIGGER_LOG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    log.id.to_string(),
                    log.trigger_id.to_string(),
                    log.call_id.to_string(),
                    log.user_id.clone(),
                    log.status.as_str(),
                    opt_int(log.http_status.map(i64::from)),
                    opt_text(log.response_body.as_deref()),
                    opt_text(log.error_message.as_deref()),
                    payload,
                    log.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_trigger_log: {e}")))?;
        Ok(())
    }

    async fn list_trigger_logs(
        &self,
        call_id: Uuid,
    ) -> Result<Vec<TriggerDeliveryLog>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TRIGGER_LOG_COLUMNS} FROM trigger_delivery_logs WHERE call_id = ?1 ORDER BY created_at ASC"
                ),
                params![call_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_trigger_logs: {e}")))?;
        collect_rows(rows, "list_trigger_logs", row_to_trigger_log).await
    }

    // ── Add-ons ─────────────────────────────────────────────────────

    async fn upsert_addon_setting(&self, setting: &AddonSetting) -> Result<(), DatabaseError> {
        let config = json_text(&setting.config)?;
        self.conn()
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO user_addons ({ADDON_SETTING_COLUMNS}) VALUES (?1, ?2, ?3, ?4)"
                ),
                params![
                    setting.user_id.clone(),
                    setting.addon_type.clone(),
                    bool_int(setting.is_enabled),
                    config,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_addon_setting: {e}")))?;
        Ok(())
    }

    async fn list_enabled_addons(&self, user_id: &str) -> Result<Vec<AddonSetting>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ADDON_SETTING_COLUMNS} FROM user_addons WHERE user_id = ?1 AND is_enabled = 1 ORDER BY addon_type"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_enabled_addons: {e}")))?;
        collect_rows(rows, "list_enabled_addons", row_to_addon_setting).await
    }

    async fn insert_addon_result(&self, result: &AddonResult) -> Result<(), DatabaseError> {
        let body = match &result.result {
            Some(v) => Some(json_text(v)?),
            None => None,
        };
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO call_addon_results ({ADDON_RESULT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    result.id.to_string(),
                    result.call_id.to_string(),
                    result.user_id.clone(),
                    result.addon_type.clone(),
                    result.status.as_str(),
                    opt_text_owned(body),
                    opt_text(result.error_message.as_deref()),
                    result.duration_ms,
                    result.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_addon_result: {e}")))?;
        Ok(())
    }

    async fn list_addon_results(&self, call_id: Uuid) -> Result<Vec<AddonResult>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ADDON_RESULT_COLUMNS} FROM call_addon_results WHERE call_id = ?1 ORDER BY created_at ASC"
                ),
                params![call_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_addon_results: {e}")))?;
        collect_rows(rows, "list_addon_results", row_to_addon_result).await
    }
}
