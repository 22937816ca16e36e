use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::status::EventStatus;

/// §3 `Event` entity. `event_body` is opaque JSON handed back to the
/// subscriber verbatim; the event log never interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub project_id: i64,
    pub status: EventStatus,
    pub created_date: DateTime<Utc>,
    pub execution_date: DateTime<Utc>,
    pub event_date: DateTime<Utc>,
    pub batch_date: DateTime<Utc>,
    pub event_body: Value,
    pub message: Option<String>,
}

/// §3 `EventPayload` entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub event_id: Uuid,
    pub project_id: i64,
    pub payload: Vec<u8>,
}

/// §3 `StatusProcessingTime` entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatusProcessingTime {
    pub event_id: Uuid,
    pub project_id: i64,
    pub status: EventStatus,
    pub processing_time_ms: i64,
}

/// §3 `EventDelivery` entity. Either `(event_id, project_id)` scoped
/// (per-event category deliveries) or `(project_id, event_type_id)`
/// scoped (project-level deliveries, e.g. `ProjectEventsToNew`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventDelivery {
    PerEvent {
        event_id: Uuid,
        project_id: i64,
        delivery_id: Uuid,
    },
    PerProject {
        project_id: i64,
        event_type_id: String,
        delivery_id: Uuid,
    },
}

/// §3 `CategorySyncTime` entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySyncTime {
    pub project_id: i64,
    pub category_name: String,
    pub last_synced: DateTime<Utc>,
}

/// §3 `CleanUpQueue` entity — FIFO of projects scheduled for hard
/// deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanUpQueueEntry {
    pub project_id: i64,
    pub slug: String,
    pub queued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_delivery_per_event_carries_both_identity_components() {
        let delivery = EventDelivery::PerEvent {
            event_id: Uuid::new_v4(),
            project_id: 7,
            delivery_id: Uuid::new_v4(),
        };

        match delivery {
            EventDelivery::PerEvent { project_id, .. } => assert_eq!(project_id, 7),
            EventDelivery::PerProject { .. } => panic!("expected PerEvent"),
        }
    }
}
