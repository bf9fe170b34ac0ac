//! Call analysis: LLM classification of a call's summary and transcript.
//!
//! The trait boundary never fails: any transport, provider, or parse error
//! collapses to `None` after being logged.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::LlmSettings;
use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, LlmConfig, LlmProvider, create_provider};

/// Transcript characters sent to the model.
const MAX_TRANSCRIPT_CHARS: usize = 12_000;

const ANALYSIS_MAX_TOKENS: u32 = 512;

const ANALYSIS_TEMPERATURE: f32 = 0.1;

pub const UNKNOWN: &str = "Unknown";
pub const NEUTRAL: &str = "Neutral";

const INTENTS: &[&str] = &[
    "Scheduling",
    "Inquiry",
    "Complaint",
    "Support",
    "Sales",
    "Other",
    "Unknown",
];

const SENTIMENTS: &[&str] = &["Positive", "Neutral", "Negative"];

/// Classification of one call. Intent, sentiment, and outcome always carry a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub intent: String,
    pub sentiment: String,
    pub outcome: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub appointment_type: Option<String>,
    pub appointment_notes: Option<String>,
}

/// Classifies a call. Returns `None` on any failure or unparsable response.
#[async_trait]
pub trait CallAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        summary: Option<&str>,
        transcript: Option<&str>,
        api_key: &SecretString,
    ) -> Option<AnalysisResult>;
}

/// `CallAnalyzer` backed by an LLM provider built from the tenant's key.
pub struct LlmCallAnalyzer {
    settings: LlmSettings,
}

impl LlmCallAnalyzer {
    pub fn new(settings: LlmSettings) -> Self {
        Self { settings }
    }

    fn provider_for(&self, api_key: &SecretString) -> Result<Arc<dyn LlmProvider>, LlmError> {
        create_provider(&LlmConfig {
            backend: self.settings.backend,
            api_key: api_key.clone(),
            model: self.settings.model.clone(),
        })
    }
}

#[async_trait]
impl CallAnalyzer for LlmCallAnalyzer {
    async fn analyze(
        &self,
        summary: Option<&str>,
        transcript: Option<&str>,
        api_key: &SecretString,
    ) -> Option<AnalysisResult> {
        if summary.is_none_or(str::is_empty) && transcript.is_none_or(str::is_empty) {
            debug!("Nothing to analyze: no summary or transcript");
            return None;
        }

        let provider = match self.provider_for(api_key) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Could not build analysis provider");
                return None;
            }
        };

        match analyze_with(provider.as_ref(), summary, transcript).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(model = provider.model_name(), error = %e, "Call analysis failed");
                None
            }
        }
    }
}

/// Run one analysis completion and parse the reply.
pub async fn analyze_with(
    provider: &dyn LlmProvider,
    summary: Option<&str>,
    transcript: Option<&str>,
) -> Result<AnalysisResult, LlmError> {
    let request = CompletionRequest::new(vec![
        ChatMessage::system(build_analysis_system_prompt()),
        ChatMessage::user(build_analysis_user_prompt(summary, transcript)),
    ])
    .with_temperature(ANALYSIS_TEMPERATURE)
    .with_max_tokens(ANALYSIS_MAX_TOKENS);

    let response = provider.complete(request).await?;
    parse_analysis_response(&response.content).map_err(|reason| LlmError::InvalidResponse {
        provider: provider.model_name().to_string(),
        reason,
    })
}

fn build_analysis_system_prompt() -> String {
    format!(
        r#"You analyze phone calls handled by a voice assistant.

Respond with ONLY a JSON object, no prose:
{{
  "intent": one of {intents},
  "sentiment": one of {sentiments},
  "outcome": short description of how the call ended,
  "customer_name": string or null,
  "customer_email": string or null,
  "appointment_date": "YYYY-MM-DD" or null,
  "appointment_time": "HH:MM" (24-hour) or null,
  "appointment_type": string or null,
  "appointment_notes": string or null
}}

Use "Scheduling" only when the caller booked or asked to book an appointment.
Use null for anything the call does not state."#,
        intents = INTENTS.join(", "),
        sentiments = SENTIMENTS.join(", "),
    )
}

fn build_analysis_user_prompt(summary: Option<&str>, transcript: Option<&str>) -> String {
    let summary = summary.filter(|s| !s.is_empty()).unwrap_or("(none)");
    let transcript = transcript
        .filter(|t| !t.is_empty())
        .map(|t| truncate_chars(t, MAX_TRANSCRIPT_CHARS))
        .unwrap_or("(none)");
    format!("Call summary:\n{summary}\n\nTranscript:\n{transcript}")
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Parse the model reply. Missing or empty fields fall back to the sentinels.
fn parse_analysis_response(text: &str) -> Result<AnalysisResult, String> {
    let json_str = extract_json_object(text);
    let value: Value =
        serde_json::from_str(&json_str).map_err(|e| format!("invalid analysis JSON: {e}"))?;
    if !value.is_object() {
        return Err("analysis reply is not a JSON object".into());
    }

    Ok(AnalysisResult {
        intent: canonical(string_field(&value, "intent"), INTENTS, "Other", UNKNOWN),
        sentiment: canonical(string_field(&value, "sentiment"), SENTIMENTS, NEUTRAL, NEUTRAL),
        outcome: string_field(&value, "outcome").unwrap_or_else(|| UNKNOWN.into()),
        customer_name: string_field(&value, "customer_name"),
        customer_email: string_field(&value, "customer_email"),
        appointment_date: string_field(&value, "appointment_date"),
        appointment_time: string_field(&value, "appointment_time"),
        appointment_type: string_field(&value, "appointment_type"),
        appointment_notes: string_field(&value, "appointment_notes"),
    })
}

/// Non-empty string (or number rendered as a string) at `key`.
fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty() && !s.eq_ignore_ascii_case("null")).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Match `raw` case-insensitively against `allowed`.
fn canonical(raw: Option<String>, allowed: &[&str], unmatched: &str, missing: &str) -> String {
    match raw {
        Some(raw) => allowed
            .iter()
            .find(|a| a.eq_ignore_ascii_case(&raw))
            .map_or_else(|| unmatched.to_string(), |a| a.to_string()),
        None => missing.to_string(),
    }
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CompletionResponse;
    use std::sync::Mutex;

    /// Provider returning a canned reply and recording the last request.
    struct CannedProvider {
        reply: Result<String, ()>,
        last_request: Mutex<Option<CompletionRequest>>,
    }

    impl CannedProvider {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                last_request: Mutex::new(None),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(()),
                last_request: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            *self.last_request.lock().unwrap() = Some(request);
            match &self.reply {
                Ok(content) => Ok(CompletionResponse {
                    content: content.clone(),
                }),
                Err(()) => Err(LlmError::RequestFailed {
                    provider: "canned".into(),
                    reason: "connection reset".into(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn full_reply_is_parsed() {
        let provider = CannedProvider::ok(
            r#"{"intent":"Scheduling","sentiment":"Positive","outcome":"Booked consultation",
                "customer_name":"Jane Doe","customer_email":null,
                "appointment_date":"2026-10-17","appointment_time":"14:00",
                "appointment_type":"consultation","appointment_notes":""}"#,
        );
        let result = analyze_with(&provider, Some("summary"), Some("transcript"))
            .await
            .unwrap();
        assert_eq!(result.intent, "Scheduling");
        assert_eq!(result.sentiment, "Positive");
        assert_eq!(result.customer_name.as_deref(), Some("Jane Doe"));
        assert_eq!(result.appointment_time.as_deref(), Some("14:00"));
        assert!(result.customer_email.is_none());
        assert!(result.appointment_notes.is_none());

        let request = provider.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.temperature, Some(ANALYSIS_TEMPERATURE));
        assert_eq!(request.max_tokens, Some(ANALYSIS_MAX_TOKENS));
    }

    #[tokio::test]
    async fn missing_fields_default_to_sentinels() {
        let provider = CannedProvider::ok("```json\n{\"customer_name\": \"Bob\"}\n```");
        let result = analyze_with(&provider, None, Some("hi")).await.unwrap();
        assert_eq!(result.intent, UNKNOWN);
        assert_eq!(result.sentiment, NEUTRAL);
        assert_eq!(result.outcome, UNKNOWN);
        assert_eq!(result.customer_name.as_deref(), Some("Bob"));
    }

    #[tokio::test]
    async fn labels_are_canonicalised() {
        let provider = CannedProvider::ok(
            r#"Here you go: {"intent":"scheduling","sentiment":"ecstatic","outcome":"ok"}"#,
        );
        let result = analyze_with(&provider, Some("s"), None).await.unwrap();
        assert_eq!(result.intent, "Scheduling");
        assert_eq!(result.sentiment, NEUTRAL);
    }

    #[tokio::test]
    async fn unparsable_reply_is_an_error() {
        let provider = CannedProvider::ok("I could not analyze this call.");
        let err = analyze_with(&provider, Some("s"), Some("t")).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn provider_failure_is_an_error() {
        let provider = CannedProvider::failing();
        assert!(analyze_with(&provider, Some("s"), Some("t")).await.is_err());
    }

    #[tokio::test]
    async fn empty_input_skips_the_provider() {
        let analyzer = LlmCallAnalyzer::new(LlmSettings::default());
        let key = SecretString::from("sk-test");
        assert!(analyzer.analyze(None, Some(""), &key).await.is_none());
    }

    #[test]
    fn transcript_is_truncated_on_char_boundary() {
        let long = "é".repeat(MAX_TRANSCRIPT_CHARS + 50);
        let prompt = build_analysis_user_prompt(None, Some(&long));
        assert_eq!(prompt.matches('é').count(), MAX_TRANSCRIPT_CHARS);
        assert!(prompt.contains("Call summary:\n(none)"));
    }

    #[test]
    fn system_prompt_lists_labels() {
        let prompt = build_analysis_system_prompt();
        for label in INTENTS.iter().chain(SENTIMENTS) {
            assert!(prompt.contains(label));
        }
    }
}
