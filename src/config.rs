//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::LlmBackend;

/// Process-level configuration, built from environment variables.
///
/// Tenant credentials (caller-ID, analysis keys, add-on settings) are not
/// process configuration; they live in the store.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// HTTP listen port.
    pub port: u16,
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Optional directory for daily-rolling log files.
    pub log_dir: Option<PathBuf>,
    pub cache: CacheConfig,
    pub llm: LlmSettings,
    /// Bounded wait for in-flight enrichment at shutdown.
    pub shutdown_grace: Duration,
    /// Maximum characters of a destination's response body kept in a delivery log.
    pub trigger_body_limit: usize,
    /// Base URL of the caller identification service.
    pub twilio_lookup_url: String,
}

/// Cache TTLs and sweep cadence.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for single-call, per-call analysis, enrichment, and summary entries.
    pub default_ttl: Duration,
    /// TTL for call listing pages and active-call listings.
    pub list_ttl: Duration,
    /// Interval of the passive expiry sweep.
    pub sweep_interval: Duration,
}

/// Which LLM backend and model the Call Analysis Client uses.
/// The API key is supplied per tenant.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub backend: LlmBackend,
    pub model: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            list_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            backend: LlmBackend::OpenAi,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("./data/call-insights.db"),
            log_dir: None,
            cache: CacheConfig::default(),
            llm: LlmSettings::default(),
            shutdown_grace: Duration::from_secs(30),
            trigger_body_limit: 1000,
            twilio_lookup_url: "https://lookups.twilio.com/v2/PhoneNumbers".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable source. Unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend = match lookup("CALL_INSIGHTS_LLM_BACKEND") {
            Some(raw) => raw.parse::<LlmBackend>().map_err(|message| {
                ConfigError::InvalidValue {
                    key: "CALL_INSIGHTS_LLM_BACKEND".into(),
                    message,
                }
            })?,
            None => defaults.llm.backend,
        };

        Ok(Self {
            port: parse_var(&lookup, "CALL_INSIGHTS_PORT")?.unwrap_or(defaults.port),
            db_path: lookup("CALL_INSIGHTS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            log_dir: lookup("CALL_INSIGHTS_LOG_DIR").map(PathBuf::from),
            cache: CacheConfig {
                default_ttl: parse_secs(&lookup, "CALL_INSIGHTS_CACHE_TTL_SECS")?
                    .unwrap_or(defaults.cache.default_ttl),
                list_ttl: parse_secs(&lookup, "CALL_INSIGHTS_LIST_CACHE_TTL_SECS")?
                    .unwrap_or(defaults.cache.list_ttl),
                sweep_interval: parse_secs(&lookup, "CALL_INSIGHTS_CACHE_SWEEP_SECS")?
                    .unwrap_or(defaults.cache.sweep_interval),
            },
            llm: LlmSettings {
                backend,
                model: lookup("CALL_INSIGHTS_LLM_MODEL").unwrap_or(defaults.llm.model),
            },
            shutdown_grace: parse_secs(&lookup, "CALL_INSIGHTS_SHUTDOWN_GRACE_SECS")?
                .unwrap_or(defaults.shutdown_grace),
            trigger_body_limit: parse_var(&lookup, "CALL_INSIGHTS_TRIGGER_BODY_LIMIT")?
                .unwrap_or(defaults.trigger_body_limit),
            twilio_lookup_url: lookup("CALL_INSIGHTS_TWILIO_LOOKUP_URL")
                .unwrap_or(defaults.twilio_lookup_url),
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_var::<F, u64>(lookup, key)?.map(Duration::from_secs))
}
