//! External collaborators used by the pipeline: caller identification,
//! call analysis, and add-ons.

pub mod addons;
pub mod analysis;
pub mod caller_id;

pub use addons::{Addon, AddonRegistry, ENRICHMENT_ADDON, HttpEnrichmentAddon};
pub use analysis::{AnalysisResult, CallAnalyzer, LlmCallAnalyzer};
pub use caller_id::{CallerLookup, LookupCredentials, TwilioLookup};
