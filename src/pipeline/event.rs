//! Inbound event envelope: parsed once into a strongly typed event.
//!
//! The voice platform's envelope has many optional, renamed, and nested
//! fields. All precedence rules and defaults are resolved here so the rest
//! of the pipeline only sees `WebhookEvent`.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::WebhookError;
use crate::store::{Appointment, LiveStatus};

/// Discriminator value for lifecycle events.
const STATUS_UPDATE: &str = "status-update";

/// A classified inbound event.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Lifecycle(LifecycleEvent),
    Terminal(TerminalEvent),
}

/// Status carried by a lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleStatus {
    Live(LiveStatus),
    Ended,
    /// Unrecognised or missing; acknowledged without a state change.
    Other(String),
}

impl LifecycleStatus {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("ended") => Self::Ended,
            Some(s) => LiveStatus::parse(s).map_or_else(|| Self::Other(s.to_string()), Self::Live),
            None => Self::Other(String::new()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Live(status) => status.as_str(),
            Self::Ended => "ended",
            Self::Other(s) => s,
        }
    }
}

/// An intermediate call-state report.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub external_call_id: Option<String>,
    pub status: LifecycleStatus,
    pub customer_number: Option<String>,
    pub agent_number: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    /// Event time; now when the envelope carries none.
    pub timestamp: DateTime<Utc>,
}

/// Appointment and customer values supplied by the platform's own extraction.
/// These win over AI-derived values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthoritativeFields {
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub appointment: Appointment,
}

impl AuthoritativeFields {
    pub fn has_appointment_data(&self) -> bool {
        let a = &self.appointment;
        a.date.is_some() || a.time.is_some() || a.kind.is_some() || a.notes.is_some()
    }
}

/// An end-of-call report.
#[derive(Debug, Clone)]
pub struct TerminalEvent {
    pub external_call_id: Option<String>,
    pub customer_number: Option<String>,
    pub agent_number: Option<String>,
    pub ended_reason: Option<String>,
    pub recording_url: Option<String>,
    pub summary: Option<String>,
    pub transcript: Option<String>,
    pub structured_data: Option<Value>,
    pub duration_seconds: Option<i64>,
    /// The whole request body, kept for replay.
    pub raw: Value,
}

impl TerminalEvent {
    pub fn authoritative_fields(&self) -> AuthoritativeFields {
        self.structured_data
            .as_ref()
            .map(authoritative_from_structured)
            .unwrap_or_default()
    }
}

/// Parse a request body. Fails only when the body is not a JSON object.
pub fn parse_event(body: &str) -> Result<WebhookEvent, WebhookError> {
    let raw: Value = serde_json::from_str(body)
        .map_err(|e| WebhookError::MalformedPayload(format!("invalid JSON: {e}")))?;
    if !raw.is_object() {
        return Err(WebhookError::MalformedPayload(
            "body must be a JSON object".into(),
        ));
    }

    // Envelopes without a `message` wrapper are read as the message itself.
    let message = match raw.get("message") {
        Some(m) if m.is_object() => m.clone(),
        _ => raw.clone(),
    };

    let event = if text(&message, "/type").as_deref() == Some(STATUS_UPDATE) {
        WebhookEvent::Lifecycle(parse_lifecycle(&message))
    } else {
        WebhookEvent::Terminal(parse_terminal(&message, raw))
    };
    Ok(event)
}

fn parse_lifecycle(message: &Value) -> LifecycleEvent {
    LifecycleEvent {
        external_call_id: text(message, "/call/id"),
        status: LifecycleStatus::parse(text(message, "/status").as_deref()),
        customer_number: customer_number(message),
        agent_number: agent_number(message),
        started_at: timestamp(message, "/startedAt").or_else(|| timestamp(message, "/call/startedAt")),
        timestamp: timestamp(message, "/timestamp").unwrap_or_else(Utc::now),
    }
}

fn parse_terminal(message: &Value, raw: Value) -> TerminalEvent {
    TerminalEvent {
        external_call_id: text(message, "/call/id"),
        customer_number: customer_number(message),
        agent_number: agent_number(message),
        ended_reason: text(message, "/endedReason"),
        recording_url: first_text(message, &["/recordingUrl", "/artifact/recordingUrl"]),
        summary: first_text(message, &["/summary", "/analysis/summary"]),
        transcript: first_text(message, &["/artifact/transcript", "/transcript"]),
        structured_data: message
            .pointer("/analysis/structuredData")
            .filter(|v| v.is_object())
            .cloned(),
        duration_seconds: call_duration(message),
        raw,
    }
}

/// Duration from the most authoritative source available:
/// explicit field, then message-level start/end, then call-level start/end.
pub fn call_duration(message: &Value) -> Option<i64> {
    if let Some(explicit) = message.get("durationSeconds").and_then(number) {
        return Some((explicit.round() as i64).max(0));
    }
    span(message, "/startedAt", "/endedAt").or_else(|| span(message, "/call/startedAt", "/call/endedAt"))
}

fn span(message: &Value, start: &str, end: &str) -> Option<i64> {
    let start = timestamp(message, start)?;
    let end = timestamp(message, end)?;
    Some((end - start).num_seconds().max(0))
}

fn customer_number(message: &Value) -> Option<String> {
    first_text(message, &["/customer/number", "/call/customer/number"])
}

fn agent_number(message: &Value) -> Option<String> {
    first_text(message, &["/phoneNumber/number", "/call/phoneNumber/number"])
}

fn authoritative_from_structured(data: &Value) -> AuthoritativeFields {
    let pick = |keys: &[&str]| keys.iter().find_map(|k| scalar_text(data.get(*k)?));
    AuthoritativeFields {
        customer_name: pick(&["customer_name", "customerName", "name"]),
        customer_email: pick(&["customer_email", "customerEmail", "email"]),
        appointment: Appointment {
            date: pick(&["appointment_date", "appointmentDate"]),
            time: pick(&["appointment_time", "appointmentTime"]),
            datetime: None,
            kind: pick(&["appointment_type", "appointmentType"]),
            notes: pick(&["appointment_notes", "appointmentNotes", "notes"]),
        },
    }
}

// ── Value accessors ─────────────────────────────────────────────────

fn text(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(scalar_text)
}

fn first_text(value: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|p| text(value, p))
}

/// Non-empty string, or a number rendered as text.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// RFC 3339 string or epoch milliseconds.
fn timestamp(value: &Value, pointer: &str) -> Option<DateTime<Utc>> {
    match value.pointer(pointer)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
