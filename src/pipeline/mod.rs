//! Call event processing pipeline.
//!
//! Inbound events flow through:
//! 1. `event::parse_event()`: envelope to typed `WebhookEvent`
//! 2. `WebhookDispatcher`: lifecycle events to the `ActiveCallTracker`,
//!    terminal events stored and acknowledged
//! 3. `EnrichmentOrchestrator`: detached on `BackgroundTasks`: analysis,
//!    keywords, add-ons, then `TriggerDispatcher`

pub mod active_calls;
pub mod dispatcher;
pub mod enrichment;
pub mod event;
pub mod keywords;
pub mod tasks;
pub mod triggers;

pub use active_calls::{ActiveCallTracker, TrackerOutcome};
pub use dispatcher::{DispatchOutcome, WebhookDispatcher};
pub use enrichment::{EnrichmentJob, EnrichmentOrchestrator, EnrichmentReport};
pub use event::{WebhookEvent, parse_event};
pub use tasks::BackgroundTasks;
pub use triggers::TriggerDispatcher;
