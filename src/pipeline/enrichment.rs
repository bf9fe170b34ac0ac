//! Enrichment orchestrator: the best-effort pipeline run after a terminal
//! event has been acknowledged.
//!
//! Flow:
//! 1. Authoritative fields from the platform's structured data
//! 2. AI analysis (only with a tenant credential)
//! 3. Keyword aggregation (transcript + analysis)
//! 4. Precedence merge and appointment normalisation
//! 5. Single analysis write, per-call cache invalidation
//! 6. Add-ons (so triggers can attach their result)
//! 7. Scheduling triggers
//!
//! No step's failure aborts the others, and nothing here reaches the webhook
//! caller. The analysis write is one statement, so a record is never
//! partially enriched.

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{Cache, CacheKey};
use crate::clients::analysis::{NEUTRAL, UNKNOWN};
use crate::clients::{AddonRegistry, AnalysisResult, CallAnalyzer, ENRICHMENT_ADDON};
use crate::error::AddonError;
use crate::pipeline::event::AuthoritativeFields;
use crate::pipeline::keywords::{aggregate_keywords, extract_keywords};
use crate::pipeline::triggers::TriggerDispatcher;
use crate::store::{
    AddonResult, Appointment, CallAnalysis, CallRecord, Database, LogStatus, UserSettings,
};

/// Intent that, with a date and time, fires scheduling triggers.
pub const SCHEDULING_INTENT: &str = "Scheduling";

/// `H`, `H:MM`, or `H:MM:SS`, optionally followed by am/pm.
static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d{1,2})(?::(\d{2}))?(?::(\d{2}))?\s*(?:([ap])\.?\s*m\.?)?$").unwrap()
});

/// Everything the orchestrator needs about one terminal call.
#[derive(Debug, Clone)]
pub struct EnrichmentJob {
    pub call: CallRecord,
    pub transcript: Option<String>,
    pub authoritative: AuthoritativeFields,
    pub settings: UserSettings,
}

/// What one run did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentReport {
    pub analysis_written: bool,
    pub keywords_merged: usize,
    pub addons_run: usize,
    pub triggers_logged: usize,
}

pub struct EnrichmentOrchestrator {
    db: Arc<dyn Database>,
    cache: Arc<Cache>,
    analyzer: Arc<dyn CallAnalyzer>,
    addons: Arc<AddonRegistry>,
    triggers: Arc<TriggerDispatcher>,
}

impl EnrichmentOrchestrator {
    pub fn new(
        db: Arc<dyn Database>,
        cache: Arc<Cache>,
        analyzer: Arc<dyn CallAnalyzer>,
        addons: Arc<AddonRegistry>,
        triggers: Arc<TriggerDispatcher>,
    ) -> Self {
        Self {
            db,
            cache,
            analyzer,
            addons,
            triggers,
        }
    }

    /// Run the full pipeline for one call. Never fails; problems are logged.
    pub async fn run(&self, job: EnrichmentJob) -> EnrichmentReport {
        let call = &job.call;
        let mut report = EnrichmentReport::default();

        // AI analysis, only when the tenant configured a key.
        let ai = match &job.settings.llm_api_key {
            Some(key) => {
                let result = self
                    .analyzer
                    .analyze(call.summary.as_deref(), job.transcript.as_deref(), key)
                    .await;
                if result.is_none() {
                    warn!(call_id = %call.id, "Analysis unavailable; falling back to structured data");
                }
                result
            }
            None => {
                debug!(call_id = %call.id, user_id = %call.user_id, "No analysis credential configured");
                None
            }
        };

        let analysis = merge_analysis(&job.authoritative, ai.as_ref(), Utc::now());
        // Only an already-analysed call stops the later steps; a failed write
        // is logged and the run carries on.
        let mut first_run = false;
        if let Some(analysis) = &analysis {
            match self.db.apply_call_analysis(call.id, analysis).await {
                Ok(true) => {
                    first_run = true;
                    report.analysis_written = true;
                    self.cache.invalidate_call(&call.user_id, call.id).await;
                    info!(
                        call_id = %call.id,
                        intent = %analysis.intent,
                        sentiment = %analysis.sentiment,
                        "Call analysis stored"
                    );
                }
                Ok(false) => {
                    warn!(call_id = %call.id, "Call already analyzed or missing; skipping keywords and triggers");
                }
                Err(e) => {
                    first_run = true;
                    error!(call_id = %call.id, error = %e, "Failed to store call analysis");
                }
            }
        } else {
            debug!(call_id = %call.id, "No analysis or structured appointment data; call left unanalyzed");
        }

        if first_run {
            if let (Some(transcript), Some(ai)) = (job.transcript.as_deref(), ai.as_ref()) {
                let keywords = extract_keywords(transcript);
                if !keywords.is_empty() {
                    report.keywords_merged =
                        aggregate_keywords(self.db.as_ref(), &call.user_id, &keywords, &ai.sentiment)
                            .await;
                }
            }
        }
        let fire_triggers = first_run && analysis.as_ref().is_some_and(should_trigger);

        let (addons_run, enriched) = self.run_addons(call).await;
        report.addons_run = addons_run;

        if let (true, Some(analysis)) = (fire_triggers, &analysis) {
            report.triggers_logged = self
                .triggers
                .dispatch(call, analysis, enriched.as_ref())
                .await;
        }

        info!(
            call_id = %call.id,
            user_id = %call.user_id,
            analysis_written = report.analysis_written,
            keywords = report.keywords_merged,
            addons = report.addons_run,
            triggers = report.triggers_logged,
            "Enrichment complete"
        );
        report
    }

    /// Run every enabled add-on, recording one result row each. Returns the
    /// number run and the successful `enrichment` result, if any.
    async fn run_addons(&self, call: &CallRecord) -> (usize, Option<Value>) {
        let Some(phone) = call.customer_phone_number.as_deref() else {
            return (0, None);
        };
        let settings = match self.db.list_enabled_addons(&call.user_id).await {
            Ok(s) => s,
            Err(e) => {
                error!(call_id = %call.id, error = %e, "Failed to load add-on settings");
                return (0, None);
            }
        };
        if settings.is_empty() {
            return (0, None);
        }

        let mut enriched = None;
        let mut run = 0;
        for setting in &settings {
            let started = Instant::now();
            let outcome = match self.addons.get(&setting.addon_type) {
                Some(addon) => addon.run(phone, &setting.config).await,
                None => Err(AddonError::Unknown {
                    addon: setting.addon_type.clone(),
                }),
            };
            let duration_ms = started.elapsed().as_millis() as i64;

            let (status, result, error_message) = match outcome {
                Ok(value) => {
                    if setting.addon_type == ENRICHMENT_ADDON {
                        enriched = Some(value.clone());
                    }
                    (LogStatus::Success, Some(value), None)
                }
                Err(e) => {
                    warn!(call_id = %call.id, addon = %setting.addon_type, error = %e, "Add-on failed");
                    (LogStatus::Error, None, Some(e.to_string()))
                }
            };

            let row = AddonResult {
                id: Uuid::new_v4(),
                call_id: call.id,
                user_id: call.user_id.clone(),
                addon_type: setting.addon_type.clone(),
                status,
                result,
                error_message,
                duration_ms,
                created_at: Utc::now(),
            };
            if let Err(e) = self.db.insert_addon_result(&row).await {
                error!(call_id = %call.id, addon = %setting.addon_type, error = %e, "Failed to record add-on result");
            }
            run += 1;
        }

        self.cache
            .delete(&CacheKey::enrichment(&call.user_id, call.id))
            .await;
        (run, enriched)
    }
}

/// Triggers fire for scheduling calls with both a date and a time.
pub fn should_trigger(analysis: &CallAnalysis) -> bool {
    analysis.intent == SCHEDULING_INTENT && analysis.appointment.is_scheduled()
}

/// Combine authoritative and AI-derived values; authoritative wins per field.
///
/// Without an AI result, structured appointment data alone still produces an
/// analysis; with neither, there is nothing to write.
pub fn merge_analysis(
    authoritative: &AuthoritativeFields,
    ai: Option<&AnalysisResult>,
    now: DateTime<Utc>,
) -> Option<CallAnalysis> {
    let auth = &authoritative.appointment;
    let (intent, sentiment, outcome, ai_appt, ai_name, ai_email) = match ai {
        Some(ai) => (
            ai.intent.clone(),
            ai.sentiment.clone(),
            ai.outcome.clone(),
            Appointment {
                date: ai.appointment_date.clone(),
                time: ai.appointment_time.clone(),
                datetime: None,
                kind: ai.appointment_type.clone(),
                notes: ai.appointment_notes.clone(),
            },
            ai.customer_name.clone(),
            ai.customer_email.clone(),
        ),
        None if authoritative.has_appointment_data() => {
            let intent = if auth.is_scheduled() {
                SCHEDULING_INTENT
            } else {
                UNKNOWN
            };
            (
                intent.to_string(),
                NEUTRAL.to_string(),
                UNKNOWN.to_string(),
                Appointment::default(),
                None,
                None,
            )
        }
        None => return None,
    };

    let date = auth.date.clone().or(ai_appt.date);
    let time = auth.time.clone().or(ai_appt.time);
    let datetime = match (&date, &time) {
        (Some(d), Some(t)) => normalize_appointment(d, t),
        _ => None,
    };

    Some(CallAnalysis {
        intent,
        sentiment,
        outcome,
        customer_name: authoritative.customer_name.clone().or(ai_name),
        customer_email: authoritative.customer_email.clone().or(ai_email),
        appointment: Appointment {
            date,
            time,
            datetime,
            kind: auth.kind.clone().or(ai_appt.kind),
            notes: auth.notes.clone().or(ai_appt.notes),
        },
        analyzed_at: now,
    })
}

/// Epoch seconds (UTC) for a date and time, or `None` if either does not parse.
pub fn normalize_appointment(date: &str, time: &str) -> Option<i64> {
    let date = parse_date(date)?;
    let time = parse_time(time)?;
    Some(date.and_time(time).and_utc().timestamp())
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%m/%d/%Y"))
        .ok()
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    let caps = TIME_RE.captures(s.trim())?;
    let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
    let second: u32 = caps.get(3).map_or(Some(0), |m| m.as_str().parse().ok())?;

    match caps.get(4).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(meridiem) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            hour %= 12;
            if meridiem == "p" {
                hour += 12;
            }
        }
        // A bare hour is ambiguous without am/pm.
        None if caps.get(2).is_none() => return None,
        None => {}
    }
    NaiveTime::from_hms_opt(hour, minute, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::Addon;
    use crate::config::CacheConfig;
    use crate::store::{AddonSetting, CallerIdentity, LibSqlBackend, SchedulingTrigger};
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ── Normalisation ───────────────────────────────────────────────

    #[test]
    fn time_formats() {
        let t = |s| parse_time(s).map(|t| t.format("%H:%M:%S").to_string());
        assert_eq!(t("14:00").as_deref(), Some("14:00:00"));
        assert_eq!(t("09:30:15").as_deref(), Some("09:30:15"));
        assert_eq!(t("2:00 PM").as_deref(), Some("14:00:00"));
        assert_eq!(t("2pm").as_deref(), Some("14:00:00"));
        assert_eq!(t("12 a.m.").as_deref(), Some("00:00:00"));
        assert_eq!(t("12:15pm").as_deref(), Some("12:15:00"));
        assert_eq!(t("14"), None);
        assert_eq!(t("13pm"), None);
        assert_eq!(t("25:00"), None);
        assert_eq!(t("afternoon"), None);
    }

    #[test]
    fn date_formats() {
        assert!(parse_date("2026-10-17").is_some());
        assert_eq!(parse_date("10/17/2026"), parse_date("2026-10-17"));
        assert!(parse_date("tomorrow").is_none());
    }

    #[test]
    fn normalized_datetime_is_utc_epoch() {
        assert_eq!(normalize_appointment("2026-10-17", "2pm"), Some(1_792_245_600));
        assert_eq!(normalize_appointment("tomorrow", "2pm"), None);
    }

    // ── Merge ───────────────────────────────────────────────────────

    fn ai_result() -> AnalysisResult {
        AnalysisResult {
            intent: "Scheduling".into(),
            sentiment: "Positive".into(),
            outcome: "Booked".into(),
            customer_name: Some("Jane D".into()),
            customer_email: Some("jane@ai.example".into()),
            appointment_date: Some("2026-10-18".into()),
            appointment_time: Some("14:00".into()),
            appointment_type: Some("consultation".into()),
            appointment_notes: None,
        }
    }

    #[test]
    fn authoritative_values_win() {
        let auth = AuthoritativeFields {
            customer_name: Some("Jane Doe".into()),
            customer_email: None,
            appointment: Appointment {
                date: Some("2026-10-17".into()),
                notes: Some("first visit".into()),
                ..Default::default()
            },
        };
        let merged = merge_analysis(&auth, Some(&ai_result()), Utc::now()).unwrap();
        assert_eq!(merged.customer_name.as_deref(), Some("Jane Doe"));
        assert_eq!(merged.customer_email.as_deref(), Some("jane@ai.example"));
        assert_eq!(merged.appointment.date.as_deref(), Some("2026-10-17"));
        assert_eq!(merged.appointment.time.as_deref(), Some("14:00"));
        assert_eq!(merged.appointment.kind.as_deref(), Some("consultation"));
        assert_eq!(merged.appointment.notes.as_deref(), Some("first visit"));
        assert_eq!(merged.appointment.datetime, Some(1_792_245_600));
        assert_eq!(merged.intent, "Scheduling");
    }

    #[test]
    fn unparsable_time_leaves_datetime_null() {
        let mut ai = ai_result();
        ai.appointment_time = Some("after lunch".into());
        let merged = merge_analysis(&AuthoritativeFields::default(), Some(&ai), Utc::now()).unwrap();
        assert_eq!(merged.appointment.time.as_deref(), Some("after lunch"));
        assert!(merged.appointment.datetime.is_none());
    }

    #[test]
    fn authoritative_only_path() {
        let mut auth = AuthoritativeFields {
            appointment: Appointment {
                date: Some("2026-10-17".into()),
                time: Some("2pm".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let merged = merge_analysis(&auth, None, Utc::now()).unwrap();
        assert_eq!(merged.intent, SCHEDULING_INTENT);
        assert_eq!(merged.sentiment, NEUTRAL);
        assert_eq!(merged.outcome, UNKNOWN);
        assert!(should_trigger(&merged));

        auth.appointment.time = None;
        let merged = merge_analysis(&auth, None, Utc::now()).unwrap();
        assert_eq!(merged.intent, UNKNOWN);
        assert!(!should_trigger(&merged));
    }

    #[test]
    fn nothing_to_merge() {
        let auth = AuthoritativeFields {
            customer_name: Some("Jane".into()),
            ..Default::default()
        };
        assert!(merge_analysis(&auth, None, Utc::now()).is_none());
    }

    // ── Orchestrator ────────────────────────────────────────────────

    struct FixedAnalyzer {
        result: Option<AnalysisResult>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CallAnalyzer for FixedAnalyzer {
        async fn analyze(
            &self,
            _summary: Option<&str>,
            _transcript: Option<&str>,
            _api_key: &SecretString,
        ) -> Option<AnalysisResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct StaticAddon;

    #[async_trait]
    impl Addon for StaticAddon {
        fn addon_type(&self) -> &str {
            ENRICHMENT_ADDON
        }

        async fn run(&self, phone_number: &str, _config: &Value) -> Result<Value, AddonError> {
            Ok(serde_json::json!({"phone": phone_number, "company": "Acme"}))
        }
    }

    struct Harness {
        db: Arc<dyn Database>,
        analyzer: Arc<FixedAnalyzer>,
        orchestrator: EnrichmentOrchestrator,
    }

    struct FailingAddon;

    #[async_trait]
    impl Addon for FailingAddon {
        fn addon_type(&self) -> &str {
            ENRICHMENT_ADDON
        }

        async fn run(&self, _phone_number: &str, _config: &Value) -> Result<Value, AddonError> {
            Err(AddonError::Request {
                addon: ENRICHMENT_ADDON.into(),
                reason: "HTTP 503".into(),
            })
        }
    }

    async fn harness(result: Option<AnalysisResult>) -> Harness {
        let mut registry = AddonRegistry::new();
        registry.register(Arc::new(StaticAddon));
        harness_with(result, LibSqlBackend::new_memory().await.unwrap(), registry).await
    }

    async fn harness_with(
        result: Option<AnalysisResult>,
        store: LibSqlBackend,
        registry: AddonRegistry,
    ) -> Harness {
        let db: Arc<dyn Database> = Arc::new(store);
        let cache = Arc::new(Cache::in_memory(CacheConfig::default()));
        let analyzer = Arc::new(FixedAnalyzer {
            result,
            calls: AtomicUsize::new(0),
        });
        let triggers = Arc::new(TriggerDispatcher::new(db.clone(), reqwest::Client::new(), 1000));
        let orchestrator = EnrichmentOrchestrator::new(
            db.clone(),
            cache,
            analyzer.clone(),
            Arc::new(registry),
            triggers,
        );
        Harness {
            db,
            analyzer,
            orchestrator,
        }
    }

    async fn stored_call(db: &dyn Database) -> CallRecord {
        let call = CallRecord {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            webhook_id: "wh_1".into(),
            external_call_id: Some("c1".into()),
            agent_phone_number: None,
            customer_phone_number: Some("+15552223333".into()),
            recording_url: None,
            ended_reason: None,
            summary: Some("Caller booked".into()),
            structured_data: None,
            raw_payload: serde_json::json!({}),
            caller: CallerIdentity::default(),
            duration_seconds: None,
            analysis: None,
            created_at: Utc::now(),
        };
        db.insert_call(&call).await.unwrap();
        call
    }

    fn job(call: CallRecord, key: Option<&str>) -> EnrichmentJob {
        EnrichmentJob {
            call,
            transcript: Some("refund refund billing billing".into()),
            authoritative: AuthoritativeFields::default(),
            settings: UserSettings {
                user_id: "u1".into(),
                llm_api_key: key.map(SecretString::from),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn analysis_keywords_and_addons() {
        let h = harness(Some(ai_result())).await;
        h.db.upsert_addon_setting(&AddonSetting {
            user_id: "u1".into(),
            addon_type: ENRICHMENT_ADDON.into(),
            is_enabled: true,
            config: serde_json::json!({}),
        })
        .await
        .unwrap();
        let call = stored_call(h.db.as_ref()).await;
        let call_id = call.id;

        let report = h.orchestrator.run(job(call, Some("sk-test"))).await;
        assert!(report.analysis_written);
        assert_eq!(report.keywords_merged, 2);
        assert_eq!(report.addons_run, 1);

        let stored = h.db.get_call(call_id).await.unwrap().unwrap();
        assert_eq!(stored.analysis.unwrap().intent, "Scheduling");
        let results = h.db.list_addon_results(call_id).await.unwrap();
        assert_eq!(results[0].result.as_ref().unwrap()["company"], "Acme");
    }

    #[tokio::test]
    async fn no_credential_skips_analyzer() {
        let h = harness(Some(ai_result())).await;
        let call = stored_call(h.db.as_ref()).await;
        let call_id = call.id;

        let report = h.orchestrator.run(job(call, None)).await;
        assert_eq!(h.analyzer.calls.load(Ordering::SeqCst), 0);
        assert!(!report.analysis_written);
        assert_eq!(report.keywords_merged, 0);
        assert!(!h.db.get_call(call_id).await.unwrap().unwrap().analysis_completed());
    }

    #[tokio::test]
    async fn failed_analysis_without_structured_data_writes_nothing() {
        let h = harness(None).await;
        let call = stored_call(h.db.as_ref()).await;
        let call_id = call.id;

        let report = h.orchestrator.run(job(call, Some("sk-test"))).await;
        assert_eq!(h.analyzer.calls.load(Ordering::SeqCst), 1);
        assert!(!report.analysis_written);
        assert!(!h.db.get_call(call_id).await.unwrap().unwrap().analysis_completed());
    }

    #[tokio::test]
    async fn structured_data_alone_fires_triggers() {
        let h = harness(None).await;
        // Unreachable destination: the attempt is still logged.
        h.db.insert_trigger(&SchedulingTrigger {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            name: "crm".into(),
            destination_url: "http://127.0.0.1:1/hook".into(),
            is_active: true,
            send_enriched_data: false,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        let call = stored_call(h.db.as_ref()).await;
        let call_id = call.id;

        let mut job = job(call, None);
        job.authoritative.appointment = Appointment {
            date: Some("2026-10-17".into()),
            time: Some("14:00".into()),
            ..Default::default()
        };
        let report = h.orchestrator.run(job).await;
        assert!(report.analysis_written);
        assert_eq!(report.triggers_logged, 1);

        let stored = h.db.get_call(call_id).await.unwrap().unwrap().analysis.unwrap();
        assert_eq!(stored.appointment.datetime, Some(1_792_245_600));
        assert_eq!(h.db.list_trigger_logs(call_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_run_does_not_refire_triggers() {
        let h = harness(Some(ai_result())).await;
        h.db.insert_trigger(&SchedulingTrigger {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            name: "crm".into(),
            destination_url: "http://127.0.0.1:1/hook".into(),
            is_active: true,
            send_enriched_data: false,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        let call = stored_call(h.db.as_ref()).await;
        let call_id = call.id;

        h.orchestrator.run(job(call.clone(), Some("sk-test"))).await;
        let report = h.orchestrator.run(job(call, Some("sk-test"))).await;
        assert!(!report.analysis_written);
        assert_eq!(report.keywords_merged, 0);
        assert_eq!(report.triggers_logged, 0);
        assert_eq!(h.db.list_trigger_logs(call_id).await.unwrap().len(), 1);

        let refund = h.db.get_keyword("u1", "refund").await.unwrap().unwrap();
        assert_eq!(refund.total_count, 1);
    }

    async fn unreachable_trigger(db: &dyn Database, send_enriched_data: bool) {
        db.insert_trigger(&SchedulingTrigger {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            name: "crm".into(),
            destination_url: "http://127.0.0.1:1/hook".into(),
            is_active: true,
            send_enriched_data,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn failed_analysis_write_still_fires_triggers() {
        let store = LibSqlBackend::new_memory().await.unwrap();
        store
            .execute_batch(
                "CREATE TRIGGER reject_call_updates BEFORE UPDATE ON calls
                 BEGIN SELECT RAISE(ABORT, 'calls are read-only'); END;",
            )
            .await;
        let h = harness_with(None, store, AddonRegistry::new()).await;
        unreachable_trigger(h.db.as_ref(), false).await;
        let call = stored_call(h.db.as_ref()).await;
        let call_id = call.id;

        let mut job = job(call, None);
        job.authoritative.appointment = Appointment {
            date: Some("2026-10-17".into()),
            time: Some("14:00".into()),
            ..Default::default()
        };
        let report = h.orchestrator.run(job).await;
        assert!(!report.analysis_written);
        assert_eq!(report.triggers_logged, 1);
        assert_eq!(h.db.list_trigger_logs(call_id).await.unwrap().len(), 1);
        assert!(!h.db.get_call(call_id).await.unwrap().unwrap().analysis_completed());
    }

    #[tokio::test]
    async fn addon_failures_are_recorded_and_triggers_still_fire() {
        let mut registry = AddonRegistry::new();
        registry.register(Arc::new(FailingAddon));
        let h = harness_with(
            Some(ai_result()),
            LibSqlBackend::new_memory().await.unwrap(),
            registry,
        )
        .await;
        for addon_type in [ENRICHMENT_ADDON, "unregistered"] {
            h.db.upsert_addon_setting(&AddonSetting {
                user_id: "u1".into(),
                addon_type: addon_type.into(),
                is_enabled: true,
                config: serde_json::json!({}),
            })
            .await
            .unwrap();
        }
        unreachable_trigger(h.db.as_ref(), true).await;
        let call = stored_call(h.db.as_ref()).await;
        let call_id = call.id;

        let report = h.orchestrator.run(job(call, Some("sk-test"))).await;
        assert!(report.analysis_written);
        assert_eq!(report.addons_run, 2);
        assert_eq!(report.triggers_logged, 1);

        let results = h.db.list_addon_results(call_id).await.unwrap();
        assert_eq!(results.len(), 2);
        for addon_type in [ENRICHMENT_ADDON, "unregistered"] {
            let row = results
                .iter()
                .find(|r| r.addon_type == addon_type)
                .unwrap();
            assert_eq!(row.status, LogStatus::Error);
            assert!(row.result.is_none());
            assert!(row.error_message.is_some());
        }

        let logs = h.db.list_trigger_logs(call_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].payload.get("enriched_data").is_none());
    }
}
