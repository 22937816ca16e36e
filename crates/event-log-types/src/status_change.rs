use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::EventStatus;

/// A lightweight project reference carried by status-change events —
/// just enough identity to route and to key gauge deltas by slug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub project_id: i64,
    pub slug: String,
}

/// The tagged union over every status-change variant, §4.3. One
/// concrete `StatusUpdater` (in `event-log-core`) exists per variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StatusChangeEvent {
    ToTriplesGenerated {
        event_id: Uuid,
        project: ProjectRef,
        processing_time_ms: i64,
        payload: Vec<u8>,
    },
    ToTriplesStore {
        event_id: Uuid,
        project: ProjectRef,
        processing_time_ms: i64,
    },
    ToFailure {
        event_id: Uuid,
        project: ProjectRef,
        message: String,
        new_status: EventStatus,
        processing_time_ms: Option<i64>,
    },
    RollbackToNew {
        event_id: Uuid,
        project: ProjectRef,
    },
    RollbackToTriplesGenerated {
        event_id: Uuid,
        project: ProjectRef,
    },
    RollbackToAwaitingDeletion {
        project: ProjectRef,
    },
    ToAwaitingDeletion {
        event_id: Uuid,
        project: ProjectRef,
    },
    RedoProjectTransformation {
        project: ProjectRef,
    },
    ProjectEventsToNew {
        project: ProjectRef,
    },
    AllEventsToNew,
}

impl StatusChangeEvent {
    /// §4.3: `ToFailure` is recoverable iff the target status is one of
    /// the `*_recoverable_failure` statuses.
    pub fn is_recoverable_failure(new_status: EventStatus) -> bool {
        matches!(
            new_status,
            EventStatus::GenerationRecoverableFailure | EventStatus::TransformationRecoverableFailure
        )
    }

    pub fn category_name(&self) -> &'static str {
        "EVENTS_STATUS_CHANGE"
    }
}

/// The envelope used when emitting `ProjectEventsToNew` outbound
/// notifications, §6 "Event JSON envelope".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEventsToNewNotification {
    pub category_name: String,
    pub project: NotificationProject,
    pub sub_category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationProject {
    pub id: i64,
    pub slug: String,
}

impl ProjectEventsToNewNotification {
    pub fn new(project: &ProjectRef) -> Self {
        Self {
            category_name: "EVENTS_STATUS_CHANGE".to_string(),
            project: NotificationProject {
                id: project.project_id,
                slug: project.slug.clone(),
            },
            sub_category: "ProjectEventsToNew".to_string(),
        }
    }
}

/// Carried by `ToFailure`'s back-off computation (§4.3, §9 open
/// question: "exact back-off formula ... per-event monotonic
/// schedule"). We formalize it as exponential with a cap, keyed by the
/// event's accumulated failure count, which the updater reads from the
/// store before computing the next `execution_date`.
pub fn recoverable_failure_backoff(failure_count: u32) -> chrono::Duration {
    let capped_exponent = failure_count.min(10);
    let seconds = 30i64.saturating_mul(1i64 << capped_exponent);
    chrono::Duration::seconds(seconds.min(24 * 3600))
}

pub fn next_execution_date(now: DateTime<Utc>, failure_count: u32) -> DateTime<Utc> {
    now + recoverable_failure_backoff(failure_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_monotonically_with_failure_count() {
        let mut previous = chrono::Duration::zero();
        for count in 0..8 {
            let backoff = recoverable_failure_backoff(count);
            assert!(backoff > previous);
            previous = backoff;
        }
    }

    #[test]
    fn backoff_is_capped_at_24_hours() {
        let backoff = recoverable_failure_backoff(50);
        assert_eq!(backoff, chrono::Duration::seconds(24 * 3600));
    }

    #[test]
    fn is_recoverable_failure_classifies_correctly() {
        assert!(StatusChangeEvent::is_recoverable_failure(
            EventStatus::GenerationRecoverableFailure
        ));
        assert!(StatusChangeEvent::is_recoverable_failure(
            EventStatus::TransformationRecoverableFailure
        ));
        assert!(!StatusChangeEvent::is_recoverable_failure(
            EventStatus::GenerationNonRecoverableFailure
        ));
    }

    #[test]
    fn notification_envelope_matches_spec_shape() {
        let project = ProjectRef {
            project_id: 42,
            slug: "group/proj".to_string(),
        };
        let notification = ProjectEventsToNewNotification::new(&project);
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["categoryName"], "EVENTS_STATUS_CHANGE");
        assert_eq!(json["project"]["id"], 42);
        assert_eq!(json["project"]["slug"], "group/proj");
        assert_eq!(json["subCategory"], "ProjectEventsToNew");
    }
}
