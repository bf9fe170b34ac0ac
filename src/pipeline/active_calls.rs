//! Active call state tracker.
//!
//! Live states (`ringing`, `in-progress`, `forwarding`) upsert the row for
//! (tenant, external call id); `ended` deletes it. Transition legality is not
//! checked, and any other status is acknowledged without a state change.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::Cache;
use crate::error::DatabaseError;
use crate::pipeline::event::{LifecycleEvent, LifecycleStatus};
use crate::store::{ActiveCall, Database, LiveStatus};

/// What a lifecycle event did to the tracked state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerOutcome {
    Upserted(LiveStatus),
    Removed,
    /// `ended` for a call that was not tracked.
    AlreadyAbsent,
    /// Unknown status or no call id.
    Ignored,
}

pub struct ActiveCallTracker {
    db: Arc<dyn Database>,
    cache: Arc<Cache>,
}

impl ActiveCallTracker {
    pub fn new(db: Arc<dyn Database>, cache: Arc<Cache>) -> Self {
        Self { db, cache }
    }

    /// Apply a lifecycle event for a tenant.
    pub async fn apply(
        &self,
        user_id: &str,
        event: &LifecycleEvent,
    ) -> Result<TrackerOutcome, DatabaseError> {
        let Some(call_id) = event.external_call_id.as_deref() else {
            debug!(user_id, status = event.status.as_str(), "Lifecycle event without call id");
            return Ok(TrackerOutcome::Ignored);
        };

        let outcome = match &event.status {
            LifecycleStatus::Live(status) => {
                self.db
                    .upsert_active_call(&ActiveCall {
                        user_id: user_id.to_string(),
                        external_call_id: call_id.to_string(),
                        status: *status,
                        customer_number: event.customer_number.clone(),
                        agent_number: event.agent_number.clone(),
                        started_at: event.started_at,
                        updated_at: event.timestamp,
                    })
                    .await?;
                TrackerOutcome::Upserted(*status)
            }
            LifecycleStatus::Ended => {
                if self.db.delete_active_call(user_id, call_id).await? {
                    TrackerOutcome::Removed
                } else {
                    TrackerOutcome::AlreadyAbsent
                }
            }
            LifecycleStatus::Other(status) => {
                debug!(user_id, call_id, status = %status, "Ignoring unrecognised call status");
                TrackerOutcome::Ignored
            }
        };

        if matches!(outcome, TrackerOutcome::Upserted(_) | TrackerOutcome::Removed) {
            self.cache.invalidate_tenant(user_id).await;
            info!(user_id, call_id, status = event.status.as_str(), "Active call state changed");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use crate::config::CacheConfig;
    use crate::store::LibSqlBackend;
    use chrono::Utc;
    use std::time::Duration;

    async fn tracker() -> (ActiveCallTracker, Arc<dyn Database>, Arc<Cache>) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let cache = Arc::new(Cache::in_memory(CacheConfig::default()));
        (ActiveCallTracker::new(db.clone(), cache.clone()), db, cache)
    }

    fn event(call_id: &str, status: LifecycleStatus) -> LifecycleEvent {
        LifecycleEvent {
            external_call_id: Some(call_id.into()),
            status,
            customer_number: Some("+15552223333".into()),
            agent_number: Some("+15550001111".into()),
            started_at: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn live_states_upsert_in_any_order() {
        let (tracker, db, _) = tracker().await;
        for status in [LiveStatus::InProgress, LiveStatus::Ringing, LiveStatus::Forwarding] {
            let outcome = tracker
                .apply("u1", &event("c1", LifecycleStatus::Live(status)))
                .await
                .unwrap();
            assert_eq!(outcome, TrackerOutcome::Upserted(status));
            let row = db.get_active_call("u1", "c1").await.unwrap().unwrap();
            assert_eq!(row.status, status);
        }
        assert_eq!(db.list_active_calls("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ringing_then_ended_leaves_no_row() {
        let (tracker, db, _) = tracker().await;
        tracker
            .apply("u1", &event("c1", LifecycleStatus::Live(LiveStatus::Ringing)))
            .await
            .unwrap();
        let outcome = tracker
            .apply("u1", &event("c1", LifecycleStatus::Ended))
            .await
            .unwrap();
        assert_eq!(outcome, TrackerOutcome::Removed);
        assert!(db.list_active_calls("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ended_without_row_is_noop() {
        let (tracker, _, _) = tracker().await;
        let outcome = tracker
            .apply("u1", &event("ghost", LifecycleStatus::Ended))
            .await
            .unwrap();
        assert_eq!(outcome, TrackerOutcome::AlreadyAbsent);
    }

    #[tokio::test]
    async fn unknown_status_changes_nothing() {
        let (tracker, db, _) = tracker().await;
        tracker
            .apply("u1", &event("c1", LifecycleStatus::Live(LiveStatus::Ringing)))
            .await
            .unwrap();
        let outcome = tracker
            .apply("u1", &event("c1", LifecycleStatus::Other("queued".into())))
            .await
            .unwrap();
        assert_eq!(outcome, TrackerOutcome::Ignored);
        let row = db.get_active_call("u1", "c1").await.unwrap().unwrap();
        assert_eq!(row.status, LiveStatus::Ringing);
    }

    #[tokio::test]
    async fn state_change_invalidates_tenant_cache() {
        let (tracker, _, cache) = tracker().await;
        let key = CacheKey::active_calls("u1");
        cache.set(&key, &0, Duration::from_secs(60)).await;
        tracker
            .apply("u1", &event("c1", LifecycleStatus::Live(LiveStatus::Ringing)))
            .await
            .unwrap();
        assert!(cache.get::<i32>(&key).await.is_none());
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let (tracker, db, _) = tracker().await;
        tracker
            .apply("u1", &event("c1", LifecycleStatus::Live(LiveStatus::Ringing)))
            .await
            .unwrap();
        tracker
            .apply("u2", &event("c1", LifecycleStatus::Ended))
            .await
            .unwrap();
        assert_eq!(db.list_active_calls("u1").await.unwrap().len(), 1);
    }
}
