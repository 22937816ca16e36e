//! The event consumer, §4.6 and §5 "Backpressure": dispatches a
//! deserialized `StatusChangeEvent` to the `StatusChanger`, limiting
//! concurrent invocations per category with a semaphore so an
//! overloaded category degrades to `429` instead of queueing
//! unboundedly.

use std::collections::HashMap;
use std::sync::Arc;

use event_log_core::status_changer::StatusChanger;
use event_log_types::{EventLogError, StatusChangeEvent};
use tokio::sync::Semaphore;

/// §4.6's dispatch outcome table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerResult {
    Accepted,
    Busy,
    UnsupportedEventType,
    BadRequest(String),
    ServiceUnavailable(String),
    SchedulingError,
}

/// The two consumer categories named in §5: individual per-event status
/// transitions, and the administrative "sync" operations that act on a
/// whole project or the whole store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerCategory {
    StatusChange,
    Sync,
}

impl ConsumerCategory {
    fn of(event: &StatusChangeEvent) -> Self {
        match event {
            StatusChangeEvent::ToTriplesGenerated { .. }
            | StatusChangeEvent::ToTriplesStore { .. }
            | StatusChangeEvent::ToFailure { .. }
            | StatusChangeEvent::RollbackToNew { .. }
            | StatusChangeEvent::RollbackToTriplesGenerated { .. }
            | StatusChangeEvent::ToAwaitingDeletion { .. } => ConsumerCategory::StatusChange,
            StatusChangeEvent::RollbackToAwaitingDeletion { .. }
            | StatusChangeEvent::RedoProjectTransformation { .. }
            | StatusChangeEvent::ProjectEventsToNew { .. }
            | StatusChangeEvent::AllEventsToNew => ConsumerCategory::Sync,
        }
    }

    fn default_limit(&self) -> usize {
        match self {
            ConsumerCategory::StatusChange => 1,
            ConsumerCategory::Sync => 4,
        }
    }
}

pub struct Consumer {
    status_changer: Arc<StatusChanger>,
    limiters: HashMap<ConsumerCategory, Arc<Semaphore>>,
}

impl Consumer {
    pub fn new(status_changer: Arc<StatusChanger>, status_change_limit: usize, sync_limit: usize) -> Self {
        let mut limiters = HashMap::new();
        limiters.insert(ConsumerCategory::StatusChange, Arc::new(Semaphore::new(status_change_limit.max(1))));
        limiters.insert(ConsumerCategory::Sync, Arc::new(Semaphore::new(sync_limit.max(1))));
        Self { status_changer, limiters }
    }

    pub fn with_defaults(status_changer: Arc<StatusChanger>) -> Self {
        Self::new(
            status_changer,
            ConsumerCategory::StatusChange.default_limit(),
            ConsumerCategory::Sync.default_limit(),
        )
    }

    pub async fn consume(&self, event: StatusChangeEvent) -> ConsumerResult {
        let category = ConsumerCategory::of(&event);
        let semaphore = match self.limiters.get(&category) {
            Some(semaphore) => semaphore.clone(),
            None => return ConsumerResult::SchedulingError,
        };

        let permit = match semaphore.try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return ConsumerResult::Busy,
        };

        let result = self.status_changer.update_statuses(event).await;
        drop(permit);

        match result {
            Ok(_) => ConsumerResult::Accepted,
            Err(err @ EventLogError::InvalidTransition { .. }) | Err(err @ EventLogError::BadRequest { .. }) => {
                ConsumerResult::BadRequest(err.to_string())
            }
            Err(EventLogError::Database { message }) => ConsumerResult::ServiceUnavailable(message),
            Err(EventLogError::NoSubscriberAvailable) => {
                ConsumerResult::ServiceUnavailable("no subscriber available".to_string())
            }
            Err(_) => ConsumerResult::SchedulingError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_log_types::ProjectRef;

    fn sample_event() -> StatusChangeEvent {
        StatusChangeEvent::RollbackToNew {
            event_id: uuid::Uuid::new_v4(),
            project: ProjectRef {
                project_id: 1,
                slug: "group/proj".to_string(),
            },
        }
    }

    #[test]
    fn status_change_events_are_categorized_correctly() {
        assert_eq!(ConsumerCategory::of(&sample_event()), ConsumerCategory::StatusChange);
        assert_eq!(
            ConsumerCategory::of(&StatusChangeEvent::AllEventsToNew),
            ConsumerCategory::Sync
        );
    }

    #[test]
    fn default_limits_match_the_spec() {
        assert_eq!(ConsumerCategory::StatusChange.default_limit(), 1);
        assert!(ConsumerCategory::Sync.default_limit() > 1);
    }
}
