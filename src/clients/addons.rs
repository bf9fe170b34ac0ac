//! Add-ons: tenant-enabled post-processing keyed by customer phone number.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AddonError;

/// Type name of the built-in HTTP data-enrichment add-on.
pub const ENRICHMENT_ADDON: &str = "enrichment";

/// A post-processing step producing supplementary data for a call.
#[async_trait]
pub trait Addon: Send + Sync {
    /// Type name matching `AddonSetting::addon_type`.
    fn addon_type(&self) -> &str;

    /// Run against the customer's phone number with the tenant's config.
    async fn run(&self, phone_number: &str, config: &Value) -> Result<Value, AddonError>;
}

/// Add-ons by type name.
#[derive(Default)]
pub struct AddonRegistry {
    addons: HashMap<String, Arc<dyn Addon>>,
}

impl AddonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in add-ons.
    pub fn with_builtins(client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HttpEnrichmentAddon::new(client)));
        registry
    }

    pub fn register(&mut self, addon: Arc<dyn Addon>) {
        let name = addon.addon_type().to_string();
        tracing::debug!(addon = %name, "Registered add-on");
        self.addons.insert(name, addon);
    }

    pub fn get(&self, addon_type: &str) -> Option<Arc<dyn Addon>> {
        self.addons.get(addon_type).cloned()
    }
}

/// Third-party data enrichment: `GET {base_url}?phone=...` with a bearer key.
pub struct HttpEnrichmentAddon {
    client: reqwest::Client,
}

impl HttpEnrichmentAddon {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn config_str<'a>(config: &'a Value, key: &str) -> Option<&'a str> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl Addon for HttpEnrichmentAddon {
    fn addon_type(&self) -> &str {
        ENRICHMENT_ADDON
    }

    async fn run(&self, phone_number: &str, config: &Value) -> Result<Value, AddonError> {
        let base_url = config_str(config, "base_url").ok_or_else(|| AddonError::Config {
            addon: ENRICHMENT_ADDON.into(),
            reason: "missing base_url".into(),
        })?;

        let mut request = self.client.get(base_url).query(&[("phone", phone_number)]);
        if let Some(key) = config_str(config, "api_key") {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await.map_err(|e| AddonError::Request {
            addon: ENRICHMENT_ADDON.into(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AddonError::Request {
                addon: ENRICHMENT_ADDON.into(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        resp.json::<Value>().await.map_err(|e| AddonError::Request {
            addon: ENRICHMENT_ADDON.into(),
            reason: format!("invalid JSON body: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Query,
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::get,
    };
    use std::collections::HashMap;

    async fn enrichment_stub(
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> impl IntoResponse {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if auth != "Bearer key-1" {
            return StatusCode::FORBIDDEN.into_response();
        }
        Json(serde_json::json!({
            "phone": query.get("phone"),
            "company": "Acme Dental"
        }))
        .into_response()
    }

    async fn start_stub() -> String {
        let app = Router::new().route("/lookup", get(enrichment_stub));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{addr}/lookup")
    }

    #[test]
    fn builtins_are_registered() {
        let registry = AddonRegistry::with_builtins(reqwest::Client::new());
        assert!(registry.get(ENRICHMENT_ADDON).is_some());
        assert!(registry.get("fraud_score").is_none());
    }

    #[tokio::test]
    async fn enrichment_returns_json_body() {
        let url = start_stub().await;
        let addon = HttpEnrichmentAddon::new(reqwest::Client::new());
        let result = addon
            .run(
                "+15552223333",
                &serde_json::json!({"base_url": url, "api_key": "key-1"}),
            )
            .await
            .unwrap();
        assert_eq!(result["company"], "Acme Dental");
        assert_eq!(result["phone"], "+15552223333");
    }

    #[tokio::test]
    async fn enrichment_rejects_bad_key() {
        let url = start_stub().await;
        let addon = HttpEnrichmentAddon::new(reqwest::Client::new());
        let err = addon
            .run("+1555", &serde_json::json!({"base_url": url, "api_key": "wrong"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn enrichment_requires_base_url() {
        let addon = HttpEnrichmentAddon::new(reqwest::Client::new());
        let err = addon.run("+1555", &serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, AddonError::Config { .. }));
    }
}
