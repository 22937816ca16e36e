//! Event Store, §4.2: transactional CRUD and aggregate queries over
//! the tables in §3. Every function here takes an already-open
//! connection (or transaction) so callers — principally the Status
//! Changer — can compose several of these into one atomic write,
//! mirroring the teacher's `db::event::Event::store` convention of
//! taking `&mut PgConnection` rather than owning a pool.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Bytea, Jsonb, Nullable, Text, Timestamptz, Uuid as SqlUuid};
use uuid::Uuid;

use event_log_types::{CategorySyncTime, Event, EventLogError, EventLogResult, EventStatus};

/// `upsertProject`: `latest_event_date` only ever moves forward.
pub fn upsert_project(
    conn: &mut PgConnection,
    project_id: i64,
    slug: &str,
    event_date: DateTime<Utc>,
) -> EventLogResult<()> {
    diesel::sql_query(
        "INSERT INTO project (project_id, slug, latest_event_date)
         VALUES ($1, $2, $3)
         ON CONFLICT (project_id) DO UPDATE
         SET latest_event_date = GREATEST(project.latest_event_date, EXCLUDED.latest_event_date)",
    )
    .bind::<BigInt, _>(project_id)
    .bind::<Text, _>(slug)
    .bind::<Timestamptz, _>(event_date)
    .execute(conn)
    .map_err(db_err("upsertProject"))?;
    Ok(())
}

/// `insertEvent`. A primary-key collision is normal for an
/// idempotently-retried ingest and is masked (§4.2 "Errors").
pub fn insert_event(conn: &mut PgConnection, event: &Event) -> EventLogResult<()> {
    let result = diesel::sql_query(
        "INSERT INTO event
            (event_id, project_id, status, created_date, execution_date, event_date, batch_date, event_body, message)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (event_id, project_id) DO NOTHING",
    )
    .bind::<SqlUuid, _>(event.event_id)
    .bind::<BigInt, _>(event.project_id)
    .bind::<Text, _>(event.status.as_str())
    .bind::<Timestamptz, _>(event.created_date)
    .bind::<Timestamptz, _>(event.execution_date)
    .bind::<Timestamptz, _>(event.event_date)
    .bind::<Timestamptz, _>(event.batch_date)
    .bind::<Jsonb, _>(&event.event_body)
    .bind::<Nullable<Text>, _>(&event.message)
    .execute(conn);

    mask_primary_key_violation(result, "insertEvent")
}

pub fn upsert_event_payload(
    conn: &mut PgConnection,
    event_id: Uuid,
    project_id: i64,
    payload: &[u8],
) -> EventLogResult<()> {
    diesel::sql_query(
        "INSERT INTO event_payload (event_id, project_id, payload)
         VALUES ($1, $2, $3)
         ON CONFLICT (event_id, project_id) DO UPDATE SET payload = EXCLUDED.payload",
    )
    .bind::<SqlUuid, _>(event_id)
    .bind::<BigInt, _>(project_id)
    .bind::<Bytea, _>(payload)
    .execute(conn)
    .map_err(db_err("upsertEventPayload"))?;
    Ok(())
}

pub fn upsert_processing_time(
    conn: &mut PgConnection,
    event_id: Uuid,
    project_id: i64,
    status: EventStatus,
    processing_time_ms: i64,
) -> EventLogResult<()> {
    diesel::sql_query(
        "INSERT INTO status_processing_time (event_id, project_id, status, processing_time_ms)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (event_id, project_id, status) DO UPDATE SET processing_time_ms = EXCLUDED.processing_time_ms",
    )
    .bind::<SqlUuid, _>(event_id)
    .bind::<BigInt, _>(project_id)
    .bind::<Text, _>(status.as_str())
    .bind::<BigInt, _>(processing_time_ms)
    .execute(conn)
    .map_err(db_err("upsertProcessingTime"))?;
    Ok(())
}

/// `upsertSubscriber`: uniqueness is on `(delivery_url, source_url)`;
/// on conflict, overwrite `delivery_id` (and capacity) rather than the
/// identity columns.
pub fn upsert_subscriber(
    conn: &mut PgConnection,
    delivery_id: Uuid,
    delivery_url: &str,
    source_url: &str,
    capacity: Option<i32>,
) -> EventLogResult<()> {
    diesel::sql_query(
        "INSERT INTO subscriber (delivery_id, delivery_url, source_url, capacity)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (delivery_url, source_url) DO UPDATE
         SET delivery_id = EXCLUDED.delivery_id, capacity = EXCLUDED.capacity",
    )
    .bind::<SqlUuid, _>(delivery_id)
    .bind::<Text, _>(delivery_url)
    .bind::<Text, _>(source_url)
    .bind::<Nullable<diesel::sql_types::Integer>, _>(capacity)
    .execute(conn)
    .map_err(db_err("upsertSubscriber"))?;
    Ok(())
}

pub fn upsert_event_delivery_per_event(
    conn: &mut PgConnection,
    event_id: Uuid,
    project_id: i64,
    delivery_id: Uuid,
) -> EventLogResult<()> {
    diesel::sql_query(
        "INSERT INTO event_delivery (event_id, project_id, delivery_id)
         VALUES ($1, $2, $3)
         ON CONFLICT (event_id, project_id) WHERE event_id IS NOT NULL
         DO UPDATE SET delivery_id = EXCLUDED.delivery_id",
    )
    .bind::<Nullable<SqlUuid>, _>(Some(event_id))
    .bind::<BigInt, _>(project_id)
    .bind::<SqlUuid, _>(delivery_id)
    .execute(conn)
    .map_err(db_err("upsertEventDelivery"))?;
    Ok(())
}

pub fn delete_event_delivery(conn: &mut PgConnection, event_id: Uuid, project_id: i64) -> EventLogResult<()> {
    diesel::sql_query("DELETE FROM event_delivery WHERE event_id = $1 AND project_id = $2")
        .bind::<SqlUuid, _>(event_id)
        .bind::<BigInt, _>(project_id)
        .execute(conn)
        .map_err(db_err("deleteEventDelivery"))?;
    Ok(())
}

pub fn upsert_category_sync_time(
    conn: &mut PgConnection,
    project_id: i64,
    category_name: &str,
    last_synced: DateTime<Utc>,
) -> EventLogResult<()> {
    diesel::sql_query(
        "INSERT INTO subscription_category_sync_time (project_id, category_name, last_synced)
         VALUES ($1, $2, $3)
         ON CONFLICT (project_id, category_name) DO UPDATE SET last_synced = EXCLUDED.last_synced",
    )
    .bind::<BigInt, _>(project_id)
    .bind::<Text, _>(category_name)
    .bind::<Timestamptz, _>(last_synced)
    .execute(conn)
    .map_err(db_err("upsertCategorySyncTime"))?;
    Ok(())
}

#[derive(diesel::QueryableByName)]
struct StatusCountRow {
    #[diesel(sql_type = Text)]
    status: String,
    #[diesel(sql_type = BigInt)]
    count: i64,
}

pub fn count_by_status(conn: &mut PgConnection, project_slug: &str) -> EventLogResult<HashMap<EventStatus, i64>> {
    let rows: Vec<StatusCountRow> = diesel::sql_query(
        "SELECT e.status AS status, COUNT(*) AS count
         FROM event e JOIN project p ON p.project_id = e.project_id
         WHERE p.slug = $1
         GROUP BY e.status",
    )
    .bind::<Text, _>(project_slug)
    .load(conn)
    .map_err(db_err("countByStatus"))?;

    let mut counts = HashMap::with_capacity(rows.len());
    for row in rows {
        let status = EventStatus::from_str(&row.status).map_err(|e| EventLogError::Database {
            message: format!("countByStatus: {e}"),
        })?;
        counts.insert(status, row.count);
    }
    Ok(counts)
}

#[derive(diesel::QueryableByName)]
struct EventRow {
    #[diesel(sql_type = SqlUuid)]
    event_id: Uuid,
    #[diesel(sql_type = BigInt)]
    project_id: i64,
    #[diesel(sql_type = Text)]
    status: String,
    #[diesel(sql_type = Timestamptz)]
    created_date: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    execution_date: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    event_date: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    batch_date: DateTime<Utc>,
    #[diesel(sql_type = Jsonb)]
    event_body: serde_json::Value,
    #[diesel(sql_type = Nullable<Text>)]
    message: Option<String>,
}

impl TryFrom<EventRow> for Event {
    type Error = EventLogError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Event {
            event_id: row.event_id,
            project_id: row.project_id,
            status: EventStatus::from_str(&row.status).map_err(|e| EventLogError::Database {
                message: format!("findEventsInStatus: {e}"),
            })?,
            created_date: row.created_date,
            execution_date: row.execution_date,
            event_date: row.event_date,
            batch_date: row.batch_date,
            event_body: row.event_body,
            message: row.message,
        })
    }
}

pub fn find_events_in_status(conn: &mut PgConnection, status: EventStatus) -> EventLogResult<Vec<Event>> {
    let rows: Vec<EventRow> = diesel::sql_query(
        "SELECT event_id, project_id, status, created_date, execution_date, event_date, batch_date, event_body, message
         FROM event WHERE status = $1",
    )
    .bind::<Text, _>(status.as_str())
    .load(conn)
    .map_err(db_err("findEventsInStatus"))?;

    rows.into_iter().map(Event::try_from).collect()
}

#[derive(diesel::QueryableByName)]
struct CategorySyncTimeRow {
    #[diesel(sql_type = BigInt)]
    project_id: i64,
    #[diesel(sql_type = Text)]
    category_name: String,
    #[diesel(sql_type = Timestamptz)]
    last_synced: DateTime<Utc>,
}

pub fn find_project_category_sync_times(
    conn: &mut PgConnection,
    project_id: i64,
) -> EventLogResult<Vec<CategorySyncTime>> {
    let rows: Vec<CategorySyncTimeRow> = diesel::sql_query(
        "SELECT project_id, category_name, last_synced FROM subscription_category_sync_time WHERE project_id = $1",
    )
    .bind::<BigInt, _>(project_id)
    .load(conn)
    .map_err(db_err("findProjectCategorySyncTimes"))?;

    Ok(rows
        .into_iter()
        .map(|row| CategorySyncTime {
            project_id: row.project_id,
            category_name: row.category_name,
            last_synced: row.last_synced,
        })
        .collect())
}

/// One row of the `GET /events?project-slug=` listing, §6: the event's
/// identity/status plus every processing-time sample recorded for it.
#[derive(Debug, Clone)]
pub struct EventSummary {
    pub id: Uuid,
    pub status: EventStatus,
    pub message: Option<String>,
    pub processing_times: Vec<(EventStatus, i64)>,
}

#[derive(diesel::QueryableByName)]
struct EventSummaryRow {
    #[diesel(sql_type = SqlUuid)]
    event_id: Uuid,
    #[diesel(sql_type = Text)]
    status: String,
    #[diesel(sql_type = Nullable<Text>)]
    message: Option<String>,
}

#[derive(diesel::QueryableByName)]
struct ProcessingTimeRow {
    #[diesel(sql_type = SqlUuid)]
    event_id: Uuid,
    #[diesel(sql_type = Text)]
    status: String,
    #[diesel(sql_type = BigInt)]
    processing_time_ms: i64,
}

/// `findEventsForProjectSlug`, §6: every event of a project together
/// with its recorded processing times, for the `GET /events` listing.
pub fn find_events_for_project_slug(conn: &mut PgConnection, project_slug: &str) -> EventLogResult<Vec<EventSummary>> {
    let event_rows: Vec<EventSummaryRow> = diesel::sql_query(
        "SELECT e.event_id AS event_id, e.status AS status, e.message AS message
         FROM event e JOIN project p ON p.project_id = e.project_id
         WHERE p.slug = $1
         ORDER BY e.event_date DESC",
    )
    .bind::<Text, _>(project_slug)
    .load(conn)
    .map_err(db_err("findEventsForProjectSlug"))?;

    let time_rows: Vec<ProcessingTimeRow> = diesel::sql_query(
        "SELECT t.event_id AS event_id, t.status AS status, t.processing_time_ms AS processing_time_ms
         FROM status_processing_time t JOIN project p ON p.project_id = t.project_id
         WHERE p.slug = $1",
    )
    .bind::<Text, _>(project_slug)
    .load(conn)
    .map_err(db_err("findEventsForProjectSlug"))?;

    let mut times_by_event: HashMap<Uuid, Vec<(EventStatus, i64)>> = HashMap::new();
    for row in time_rows {
        let status = EventStatus::from_str(&row.status).map_err(|e| EventLogError::Database {
            message: format!("findEventsForProjectSlug: {e}"),
        })?;
        times_by_event.entry(row.event_id).or_default().push((status, row.processing_time_ms));
    }

    event_rows
        .into_iter()
        .map(|row| {
            let status = EventStatus::from_str(&row.status).map_err(|e| EventLogError::Database {
                message: format!("findEventsForProjectSlug: {e}"),
            })?;
            Ok(EventSummary {
                id: row.event_id,
                status,
                message: row.message,
                processing_times: times_by_event.remove(&row.event_id).unwrap_or_default(),
            })
        })
        .collect()
}

#[derive(diesel::QueryableByName)]
struct NotificationRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = Jsonb)]
    payload: serde_json::Value,
}

/// Claims the oldest pending `status_change_events_queue` row without
/// deleting it, so the caller can attempt delivery first and only
/// delete on a confirmed hand-off (§3 SUPPLEMENT). `FOR UPDATE SKIP
/// LOCKED` lets several pollers run without double-claiming a row.
pub fn peek_oldest_notification(conn: &mut PgConnection) -> EventLogResult<Option<(i64, serde_json::Value)>> {
    let rows: Vec<NotificationRow> =
        diesel::sql_query("SELECT id, payload FROM status_change_events_queue ORDER BY id ASC LIMIT 1 FOR UPDATE SKIP LOCKED")
            .load(conn)
            .map_err(db_err("peekOldestNotification"))?;
    Ok(rows.into_iter().next().map(|row| (row.id, row.payload)))
}

/// Deletes a notification row after successful hand-off to a
/// subscriber.
pub fn delete_notification(conn: &mut PgConnection, id: i64) -> EventLogResult<()> {
    diesel::sql_query("DELETE FROM status_change_events_queue WHERE id = $1")
        .bind::<BigInt, _>(id)
        .execute(conn)
        .map_err(db_err("deleteNotification"))?;
    Ok(())
}

fn db_err(op: &'static str) -> impl FnOnce(diesel::result::Error) -> EventLogError {
    move |e| EventLogError::Database {
        message: format!("{op}: {e}"),
    }
}

/// Masks a primary-key (unique) violation as success, per §4.2
/// "Errors" — idempotent upserts expressed as plain inserts treat a
/// duplicate key as a no-op, not a failure. Any other error is fatal.
fn mask_primary_key_violation(
    result: Result<usize, diesel::result::Error>,
    op: &'static str,
) -> EventLogResult<()> {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};
    match result {
        Ok(_) => Ok(()),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Ok(()),
        Err(e) => Err(EventLogError::Database {
            message: format!("{op}: {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_primary_key_violation_passes_through_other_errors() {
        let err = mask_primary_key_violation(Err(diesel::result::Error::NotFound), "insertEvent");
        assert!(err.is_err());
    }

    #[test]
    fn mask_primary_key_violation_accepts_success() {
        let ok = mask_primary_key_violation(Ok(1), "insertEvent");
        assert!(ok.is_ok());
    }
}
