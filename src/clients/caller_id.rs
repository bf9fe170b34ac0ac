//! Caller identification: phone-number metadata from Twilio Lookup v2.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::LookupError;
use crate::store::{CallerIdentity, UserSettings};

/// Fields requested from the Lookup API.
const LOOKUP_FIELDS: &str = "line_type_intelligence,caller_name";

/// Tenant credentials for caller lookup.
#[derive(Debug, Clone)]
pub struct LookupCredentials {
    pub account_sid: String,
    pub auth_token: SecretString,
}

impl LookupCredentials {
    /// Both the SID and the token must be configured.
    pub fn from_settings(settings: &UserSettings) -> Option<Self> {
        match (&settings.twilio_account_sid, &settings.twilio_auth_token) {
            (Some(sid), Some(token)) if !sid.is_empty() => Some(Self {
                account_sid: sid.clone(),
                auth_token: token.clone(),
            }),
            _ => None,
        }
    }
}

/// Looks up caller metadata. Returns `None` on any failure.
#[async_trait]
pub trait CallerLookup: Send + Sync {
    async fn lookup(
        &self,
        phone_number: &str,
        credentials: &LookupCredentials,
    ) -> Option<CallerIdentity>;
}

/// Twilio Lookup v2 client.
pub struct TwilioLookup {
    client: reqwest::Client,
    base_url: String,
}

impl TwilioLookup {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn fetch(
        &self,
        phone_number: &str,
        credentials: &LookupCredentials,
    ) -> Result<CallerIdentity, LookupError> {
        let url = format!("{}/{}", self.base_url, phone_number);
        let resp = self
            .client
            .get(&url)
            .query(&[("Fields", LOOKUP_FIELDS)])
            .basic_auth(
                &credentials.account_sid,
                Some(credentials.auth_token.expose_secret()),
            )
            .send()
            .await
            .map_err(|e| LookupError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(LookupError::Status {
                status: resp.status().as_u16(),
            });
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| LookupError::Decode(e.to_string()))?;
        Ok(identity_from_lookup(&body))
    }
}

#[async_trait]
impl CallerLookup for TwilioLookup {
    async fn lookup(
        &self,
        phone_number: &str,
        credentials: &LookupCredentials,
    ) -> Option<CallerIdentity> {
        match self.fetch(phone_number, credentials).await {
            Ok(identity) => {
                debug!(
                    carrier = ?identity.carrier_name,
                    line_type = ?identity.line_type,
                    "Caller lookup succeeded"
                );
                Some(identity)
            }
            Err(e) => {
                warn!(error = %e, "Caller lookup failed");
                None
            }
        }
    }
}

/// Map a Lookup v2 response body onto caller identity fields.
fn identity_from_lookup(body: &Value) -> CallerIdentity {
    let text = |section: &str, field: &str| {
        body.get(section)
            .and_then(|s| s.get(field))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    CallerIdentity {
        caller_name: text("caller_name", "caller_name"),
        caller_type: text("caller_name", "caller_type"),
        carrier_name: text("line_type_intelligence", "carrier_name"),
        line_type: text("line_type_intelligence", "type"),
    }
}
