//! One concrete [`StatusUpdater`] per [`StatusChangeEvent`] variant,
//! §4.3. `StatusChanger::update_statuses` looks up the updater for the
//! event it was handed and drives `update_db` inside a transaction,
//! falling back to `on_rollback` if the transaction fails.

use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text, Timestamptz, Uuid as SqlUuid};
use uuid::Uuid;

use event_log_db::store;
use event_log_types::{
    next_execution_date, DbUpdateResults, EventLogError, EventLogResult, EventStatus, ProjectEventsToNewNotification,
    ProjectRef, StatusChangeEvent,
};

pub trait StatusUpdater: Send + Sync {
    fn update_db(&self, conn: &mut PgConnection, event: &StatusChangeEvent) -> EventLogResult<DbUpdateResults>;

    /// Best-effort compensation after a failed `update_db`. Returns
    /// `true` if the hook made the situation whole and the original
    /// error should be swallowed, `false` to have it re-raised (§4.3
    /// step 3).
    fn on_rollback(
        &self,
        _conn: &mut PgConnection,
        _event: &StatusChangeEvent,
        _error: &EventLogError,
    ) -> EventLogResult<bool> {
        Ok(false)
    }
}

/// Picks the updater registered for `event`'s variant.
pub fn updater_for(event: &StatusChangeEvent) -> &'static dyn StatusUpdater {
    match event {
        StatusChangeEvent::ToTriplesGenerated { .. } => &ToTriplesGeneratedUpdater,
        StatusChangeEvent::ToTriplesStore { .. } => &ToTriplesStoreUpdater,
        StatusChangeEvent::ToFailure { .. } => &ToFailureUpdater,
        StatusChangeEvent::RollbackToNew { .. } => &RollbackToNewUpdater,
        StatusChangeEvent::RollbackToTriplesGenerated { .. } => &RollbackToTriplesGeneratedUpdater,
        StatusChangeEvent::RollbackToAwaitingDeletion { .. } => &RollbackToAwaitingDeletionUpdater,
        StatusChangeEvent::ToAwaitingDeletion { .. } => &ToAwaitingDeletionUpdater,
        StatusChangeEvent::RedoProjectTransformation { .. } => &RedoProjectTransformationUpdater,
        StatusChangeEvent::ProjectEventsToNew { .. } => &ProjectEventsToNewUpdater,
        StatusChangeEvent::AllEventsToNew => &AllEventsToNewUpdater,
    }
}

fn mismatched(name: &'static str) -> EventLogError {
    EventLogError::Database {
        message: format!("{name} received a status-change event of the wrong variant"),
    }
}

fn transition_one(
    conn: &mut PgConnection,
    event_id: Uuid,
    project_id: i64,
    from: EventStatus,
    to: EventStatus,
) -> EventLogResult<bool> {
    let affected = diesel::sql_query(
        "UPDATE event SET status = $1, execution_date = now()
         WHERE event_id = $2 AND project_id = $3 AND status = $4",
    )
    .bind::<Text, _>(to.as_str())
    .bind::<SqlUuid, _>(event_id)
    .bind::<BigInt, _>(project_id)
    .bind::<Text, _>(from.as_str())
    .execute(conn)
    .map_err(|e| EventLogError::Database {
        message: format!("transition {} -> {}: {e}", from, to),
    })?;
    Ok(affected > 0)
}

fn single_delta(slug: &str, from: EventStatus, to: EventStatus) -> DbUpdateResults {
    let mut deltas = std::collections::HashMap::new();
    deltas.insert(from, -1);
    deltas.insert(to, 1);
    DbUpdateResults::single_project(slug, deltas)
}

/// Compensating delete used by every per-event updater's rollback hook.
fn delete_delivery_best_effort(conn: &mut PgConnection, event_id: Uuid, project_id: i64) -> bool {
    store::delete_event_delivery(conn, event_id, project_id).is_ok()
}

pub struct ToTriplesGeneratedUpdater;

impl StatusUpdater for ToTriplesGeneratedUpdater {
    fn update_db(&self, conn: &mut PgConnection, event: &StatusChangeEvent) -> EventLogResult<DbUpdateResults> {
        let StatusChangeEvent::ToTriplesGenerated {
            event_id,
            project,
            processing_time_ms,
            payload,
        } = event
        else {
            return Err(mismatched("ToTriplesGeneratedUpdater"));
        };

        let updated = transition_one(
            conn,
            *event_id,
            project.project_id,
            EventStatus::GeneratingTriples,
            EventStatus::TriplesGenerated,
        )?;
        if !updated {
            return Ok(DbUpdateResults::Empty);
        }

        store::upsert_event_payload(conn, *event_id, project.project_id, payload)?;
        store::upsert_processing_time(
            conn,
            *event_id,
            project.project_id,
            EventStatus::TriplesGenerated,
            *processing_time_ms,
        )?;
        store::delete_event_delivery(conn, *event_id, project.project_id)?;

        Ok(single_delta(&project.slug, EventStatus::GeneratingTriples, EventStatus::TriplesGenerated))
    }

    fn on_rollback(
        &self,
        conn: &mut PgConnection,
        event: &StatusChangeEvent,
        _error: &EventLogError,
    ) -> EventLogResult<bool> {
        let StatusChangeEvent::ToTriplesGenerated { event_id, project, .. } = event else {
            return Ok(false);
        };
        Ok(delete_delivery_best_effort(conn, *event_id, project.project_id))
    }
}

pub struct ToTriplesStoreUpdater;

impl StatusUpdater for ToTriplesStoreUpdater {
    fn update_db(&self, conn: &mut PgConnection, event: &StatusChangeEvent) -> EventLogResult<DbUpdateResults> {
        let StatusChangeEvent::ToTriplesStore {
            event_id,
            project,
            processing_time_ms,
        } = event
        else {
            return Err(mismatched("ToTriplesStoreUpdater"));
        };

        let updated = transition_one(
            conn,
            *event_id,
            project.project_id,
            EventStatus::TransformingTriples,
            EventStatus::TriplesStore,
        )?;
        if !updated {
            return Ok(DbUpdateResults::Empty);
        }

        store::upsert_processing_time(
            conn,
            *event_id,
            project.project_id,
            EventStatus::TriplesStore,
            *processing_time_ms,
        )?;
        store::delete_event_delivery(conn, *event_id, project.project_id)?;

        Ok(single_delta(&project.slug, EventStatus::TransformingTriples, EventStatus::TriplesStore))
    }

    fn on_rollback(
        &self,
        conn: &mut PgConnection,
        event: &StatusChangeEvent,
        _error: &EventLogError,
    ) -> EventLogResult<bool> {
        let StatusChangeEvent::ToTriplesStore { event_id, project, .. } = event else {
            return Ok(false);
        };
        Ok(delete_delivery_best_effort(conn, *event_id, project.project_id))
    }
}

/// Statuses an event can be "in flight" in, i.e. eligible to fail from.
const IN_FLIGHT_STATUSES: [EventStatus; 2] = [EventStatus::GeneratingTriples, EventStatus::TransformingTriples];

pub struct ToFailureUpdater;

impl StatusUpdater for ToFailureUpdater {
    fn update_db(&self, conn: &mut PgConnection, event: &StatusChangeEvent) -> EventLogResult<DbUpdateResults> {
        let StatusChangeEvent::ToFailure {
            event_id,
            project,
            message,
            new_status,
            processing_time_ms,
        } = event
        else {
            return Err(mismatched("ToFailureUpdater"));
        };

        let recoverable = StatusChangeEvent::is_recoverable_failure(*new_status);

        #[derive(diesel::QueryableByName)]
        struct CurrentRow {
            #[diesel(sql_type = Text)]
            status: String,
            #[diesel(sql_type = diesel::sql_types::Nullable<Text>)]
            message: Option<String>,
        }

        let current: Option<CurrentRow> = diesel::sql_query(
            "SELECT status, message FROM event WHERE event_id = $1 AND project_id = $2 FOR UPDATE",
        )
        .bind::<SqlUuid, _>(*event_id)
        .bind::<BigInt, _>(project.project_id)
        .get_result(conn)
        .optional()
        .map_err(|e| EventLogError::Database {
            message: format!("ToFailure: failed to read current event: {e}"),
        })?;

        let Some(current) = current else {
            return Ok(DbUpdateResults::Empty);
        };

        let from_status: EventStatus = current.status.parse().map_err(|_| EventLogError::Database {
            message: format!("ToFailure: unrecognized current status {}", current.status),
        })?;
        if !IN_FLIGHT_STATUSES.contains(&from_status) {
            return Ok(DbUpdateResults::Empty);
        }

        let prior_failure_count = current
            .message
            .as_deref()
            .map(|m| m.split(" | ").filter(|s| !s.is_empty()).count())
            .unwrap_or(0) as u32;
        let appended_message = match &current.message {
            Some(existing) if !existing.is_empty() => format!("{existing} | {message}"),
            _ => message.clone(),
        };

        let execution_date = if recoverable {
            next_execution_date(Utc::now(), prior_failure_count)
        } else {
            Utc::now()
        };

        diesel::sql_query(
            "UPDATE event SET status = $1, execution_date = $2, message = $3
             WHERE event_id = $4 AND project_id = $5",
        )
        .bind::<Text, _>(new_status.as_str())
        .bind::<Timestamptz, _>(execution_date)
        .bind::<Text, _>(&appended_message)
        .bind::<SqlUuid, _>(*event_id)
        .bind::<BigInt, _>(project.project_id)
        .execute(conn)
        .map_err(|e| EventLogError::Database {
            message: format!("ToFailure: update failed: {e}"),
        })?;

        if let Some(processing_time_ms) = processing_time_ms {
            store::upsert_processing_time(conn, *event_id, project.project_id, *new_status, *processing_time_ms)?;
        }

        if !recoverable {
            store::delete_event_delivery(conn, *event_id, project.project_id)?;
        }

        Ok(single_delta(&project.slug, from_status, *new_status))
    }

    fn on_rollback(
        &self,
        conn: &mut PgConnection,
        event: &StatusChangeEvent,
        _error: &EventLogError,
    ) -> EventLogResult<bool> {
        let StatusChangeEvent::ToFailure { event_id, project, .. } = event else {
            return Ok(false);
        };
        Ok(delete_delivery_best_effort(conn, *event_id, project.project_id))
    }
}

pub struct RollbackToNewUpdater;

impl StatusUpdater for RollbackToNewUpdater {
    fn update_db(&self, conn: &mut PgConnection, event: &StatusChangeEvent) -> EventLogResult<DbUpdateResults> {
        let StatusChangeEvent::RollbackToNew { event_id, project } = event else {
            return Err(mismatched("RollbackToNewUpdater"));
        };

        let updated = transition_one(conn, *event_id, project.project_id, EventStatus::GeneratingTriples, EventStatus::New)?;
        if !updated {
            // Concurrent rollback lost the race: zero rows affected, NotUpdated (§5).
            return Ok(DbUpdateResults::Empty);
        }
        store::delete_event_delivery(conn, *event_id, project.project_id)?;

        Ok(single_delta(&project.slug, EventStatus::GeneratingTriples, EventStatus::New))
    }

    fn on_rollback(
        &self,
        conn: &mut PgConnection,
        event: &StatusChangeEvent,
        _error: &EventLogError,
    ) -> EventLogResult<bool> {
        let StatusChangeEvent::RollbackToNew { event_id, project } = event else {
            return Ok(false);
        };
        Ok(delete_delivery_best_effort(conn, *event_id, project.project_id))
    }
}

pub struct RollbackToTriplesGeneratedUpdater;

impl StatusUpdater for RollbackToTriplesGeneratedUpdater {
    fn update_db(&self, conn: &mut PgConnection, event: &StatusChangeEvent) -> EventLogResult<DbUpdateResults> {
        let StatusChangeEvent::RollbackToTriplesGenerated { event_id, project } = event else {
            return Err(mismatched("RollbackToTriplesGeneratedUpdater"));
        };

        let updated = transition_one(
            conn,
            *event_id,
            project.project_id,
            EventStatus::TransformingTriples,
            EventStatus::TriplesGenerated,
        )?;
        if !updated {
            return Ok(DbUpdateResults::Empty);
        }
        store::delete_event_delivery(conn, *event_id, project.project_id)?;

        Ok(single_delta(&project.slug, EventStatus::TransformingTriples, EventStatus::TriplesGenerated))
    }

    fn on_rollback(
        &self,
        conn: &mut PgConnection,
        event: &StatusChangeEvent,
        _error: &EventLogError,
    ) -> EventLogResult<bool> {
        let StatusChangeEvent::RollbackToTriplesGenerated { event_id, project } = event else {
            return Ok(false);
        };
        Ok(delete_delivery_best_effort(conn, *event_id, project.project_id))
    }
}

pub struct RollbackToAwaitingDeletionUpdater;

impl StatusUpdater for RollbackToAwaitingDeletionUpdater {
    fn update_db(&self, conn: &mut PgConnection, event: &StatusChangeEvent) -> EventLogResult<DbUpdateResults> {
        let StatusChangeEvent::RollbackToAwaitingDeletion { project } = event else {
            return Err(mismatched("RollbackToAwaitingDeletionUpdater"));
        };

        let affected = diesel::sql_query(
            "UPDATE event SET status = $1, execution_date = now()
             WHERE project_id = $2 AND status = $3",
        )
        .bind::<Text, _>(EventStatus::AwaitingDeletion.as_str())
        .bind::<BigInt, _>(project.project_id)
        .bind::<Text, _>(EventStatus::Deleting.as_str())
        .execute(conn)
        .map_err(|e| EventLogError::Database {
            message: format!("RollbackToAwaitingDeletion: {e}"),
        })?;

        if affected == 0 {
            return Ok(DbUpdateResults::Empty);
        }

        diesel::sql_query("DELETE FROM event_delivery WHERE project_id = $1 AND event_type_id IS NOT NULL")
            .bind::<BigInt, _>(project.project_id)
            .execute(conn)
            .map_err(|e| EventLogError::Database {
                message: format!("RollbackToAwaitingDeletion: clearing delivery: {e}"),
            })?;

        let mut deltas = std::collections::HashMap::new();
        deltas.insert(EventStatus::Deleting, -(affected as i64));
        deltas.insert(EventStatus::AwaitingDeletion, affected as i64);
        Ok(DbUpdateResults::single_project(&project.slug, deltas))
    }
}

pub struct ToAwaitingDeletionUpdater;

impl StatusUpdater for ToAwaitingDeletionUpdater {
    fn update_db(&self, conn: &mut PgConnection, event: &StatusChangeEvent) -> EventLogResult<DbUpdateResults> {
        let StatusChangeEvent::ToAwaitingDeletion { event_id, project } = event else {
            return Err(mismatched("ToAwaitingDeletionUpdater"));
        };

        #[derive(diesel::QueryableByName)]
        struct CurrentRow {
            #[diesel(sql_type = Text)]
            status: String,
        }
        let current: Option<CurrentRow> =
            diesel::sql_query("SELECT status FROM event WHERE event_id = $1 AND project_id = $2")
                .bind::<SqlUuid, _>(*event_id)
                .bind::<BigInt, _>(project.project_id)
                .get_result(conn)
                .optional()
                .map_err(|e| EventLogError::Database {
                    message: format!("ToAwaitingDeletion: {e}"),
                })?;
        let Some(current) = current else {
            return Ok(DbUpdateResults::Empty);
        };
        let from_status: EventStatus = current.status.parse().map_err(|_| EventLogError::Database {
            message: format!("ToAwaitingDeletion: unrecognized current status {}", current.status),
        })?;
        if from_status == EventStatus::Deleting {
            return Ok(DbUpdateResults::Empty);
        }

        diesel::sql_query("UPDATE event SET status = $1, execution_date = now() WHERE event_id = $2 AND project_id = $3")
            .bind::<Text, _>(EventStatus::AwaitingDeletion.as_str())
            .bind::<SqlUuid, _>(*event_id)
            .bind::<BigInt, _>(project.project_id)
            .execute(conn)
            .map_err(|e| EventLogError::Database {
                message: format!("ToAwaitingDeletion: update failed: {e}"),
            })?;
        store::delete_event_delivery(conn, *event_id, project.project_id)?;

        Ok(single_delta(&project.slug, from_status, EventStatus::AwaitingDeletion))
    }

    fn on_rollback(
        &self,
        conn: &mut PgConnection,
        event: &StatusChangeEvent,
        _error: &EventLogError,
    ) -> EventLogResult<bool> {
        let StatusChangeEvent::ToAwaitingDeletion { event_id, project } = event else {
            return Ok(false);
        };
        Ok(delete_delivery_best_effort(conn, *event_id, project.project_id))
    }
}

pub struct RedoProjectTransformationUpdater;

impl StatusUpdater for RedoProjectTransformationUpdater {
    fn update_db(&self, conn: &mut PgConnection, event: &StatusChangeEvent) -> EventLogResult<DbUpdateResults> {
        let StatusChangeEvent::RedoProjectTransformation { project } = event else {
            return Err(mismatched("RedoProjectTransformationUpdater"));
        };

        let affected = diesel::sql_query(
            "UPDATE event SET status = $1, execution_date = now()
             WHERE project_id = $2 AND status = $3",
        )
        .bind::<Text, _>(EventStatus::TriplesGenerated.as_str())
        .bind::<BigInt, _>(project.project_id)
        .bind::<Text, _>(EventStatus::TriplesStore.as_str())
        .execute(conn)
        .map_err(|e| EventLogError::Database {
            message: format!("RedoProjectTransformation: {e}"),
        })?;

        if affected == 0 {
            return Ok(DbUpdateResults::Empty);
        }

        let mut deltas = std::collections::HashMap::new();
        deltas.insert(EventStatus::TriplesStore, -(affected as i64));
        deltas.insert(EventStatus::TriplesGenerated, affected as i64);
        Ok(DbUpdateResults::single_project(&project.slug, deltas))
    }
}

/// Enqueues the durable `ProjectEventsToNew` notification (§3 SUPPLEMENT),
/// consumed by the dispatch layer. Shared by the single-project and
/// all-projects variants.
fn enqueue_notification(conn: &mut PgConnection, project: &ProjectRef) -> EventLogResult<()> {
    let notification = ProjectEventsToNewNotification::new(project);
    let payload = serde_json::to_value(&notification).map_err(|e| EventLogError::Serialization {
        message: format!("ProjectEventsToNew notification: {e}"),
    })?;

    diesel::sql_query("INSERT INTO status_change_events_queue (project_id, payload) VALUES ($1, $2)")
        .bind::<BigInt, _>(project.project_id)
        .bind::<diesel::sql_types::Jsonb, _>(payload)
        .execute(conn)
        .map_err(|e| EventLogError::Database {
            message: format!("enqueue ProjectEventsToNew: {e}"),
        })?;
    Ok(())
}

pub struct ProjectEventsToNewUpdater;

impl StatusUpdater for ProjectEventsToNewUpdater {
    fn update_db(&self, conn: &mut PgConnection, event: &StatusChangeEvent) -> EventLogResult<DbUpdateResults> {
        let StatusChangeEvent::ProjectEventsToNew { project } = event else {
            return Err(mismatched("ProjectEventsToNewUpdater"));
        };
        enqueue_notification(conn, project)?;
        // §4.3: the actual counter changes happen when each project's
        // event is processed, not when the notification is queued.
        Ok(DbUpdateResults::Empty)
    }
}

#[derive(diesel::QueryableByName)]
struct ProjectIdentityRow {
    #[diesel(sql_type = BigInt)]
    project_id: i64,
    #[diesel(sql_type = Text)]
    slug: String,
}

pub struct AllEventsToNewUpdater;

impl StatusUpdater for AllEventsToNewUpdater {
    fn update_db(&self, conn: &mut PgConnection, event: &StatusChangeEvent) -> EventLogResult<DbUpdateResults> {
        if !matches!(event, StatusChangeEvent::AllEventsToNew) {
            return Err(mismatched("AllEventsToNewUpdater"));
        }

        let projects: Vec<ProjectIdentityRow> = diesel::sql_query("SELECT project_id, slug FROM project")
            .load(conn)
            .map_err(|e| EventLogError::Database {
                message: format!("AllEventsToNew: listing projects: {e}"),
            })?;

        for row in &projects {
            enqueue_notification(
                conn,
                &ProjectRef {
                    project_id: row.project_id,
                    slug: row.slug.clone(),
                },
            )?;
        }

        Ok(DbUpdateResults::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_log_types::ProjectRef;

    #[test]
    fn updater_for_routes_each_variant_to_a_distinct_type() {
        let project = ProjectRef {
            project_id: 1,
            slug: "group/proj".to_string(),
        };

        let events = vec![
            StatusChangeEvent::ToTriplesGenerated {
                event_id: Uuid::new_v4(),
                project: project.clone(),
                processing_time_ms: 10,
                payload: vec![],
            },
            StatusChangeEvent::AllEventsToNew,
        ];

        for event in events {
            // Routing must not panic for any variant; exercised fully
            // against a real connection in integration tests.
            let _ = updater_for(&event);
        }
    }
}
