//! Cache key namespaces. Every key is `{kind}:{user_id}:...` so a tenant's
//! entries for one kind can be found by prefix.

use uuid::Uuid;

const RECORDINGS: &str = "recordings";
const CALL: &str = "call";
const ANALYSIS: &str = "analysis";
const ENRICHMENT: &str = "enrichment";

/// Builders for the keys the read path caches under.
pub struct CacheKey;

impl CacheKey {
    /// One page of a tenant's call listing.
    pub fn recordings_page(user_id: &str, page: u32) -> String {
        format!("{RECORDINGS}:{user_id}:page:{page}")
    }

    /// Prefix covering every listing page of a tenant.
    pub fn recordings_pages(user_id: &str) -> String {
        format!("{RECORDINGS}:{user_id}:page:")
    }

    pub fn active_calls(user_id: &str) -> String {
        format!("{RECORDINGS}:{user_id}:active")
    }

    pub fn call(user_id: &str, call_id: Uuid) -> String {
        format!("{CALL}:{user_id}:{call_id}")
    }

    pub fn call_analysis(user_id: &str, call_id: Uuid) -> String {
        format!("{ANALYSIS}:{user_id}:{call_id}")
    }

    pub fn analysis_summary(user_id: &str) -> String {
        format!("{ANALYSIS}:{user_id}:summary")
    }

    pub fn enrichment(user_id: &str, call_id: Uuid) -> String {
        format!("{ENRICHMENT}:{user_id}:{call_id}")
    }

    /// All prefixes that make up a tenant's namespace.
    pub fn tenant_prefixes(user_id: &str) -> [String; 4] {
        [RECORDINGS, CALL, ANALYSIS, ENRICHMENT].map(|kind| format!("{kind}:{user_id}:"))
    }
}
