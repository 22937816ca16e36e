//! The Finder, §4.5: selects the next event to dispatch for one
//! category, atomically marks it in-flight, and hands it an
//! already-resolved delivery slot.
//!
//! Note on sequencing: §4.5 step 5 has `popEvent` insert the
//! `event_delivery` row, but that row's `delivery_id` is a foreign key
//! to a real subscriber (§3). We resolve this by having the calling
//! loop acquire a subscriber from the registry *before* calling
//! `pop_event`, passing its `delivery_id` in — `popEvent` and "assign a
//! subscriber" become one atomic step rather than two, which is the
//! only way to satisfy both "insert event_delivery" and "delivery_id
//! is NOT NULL" without a second transaction.

use std::collections::HashMap;
use std::sync::Arc;

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text, Timestamptz};
use uuid::Uuid;

use event_log_core::GaugesUpdater;
use event_log_db::DbPool;
use event_log_types::{DbUpdateResults, Event, EventLogError, EventLogResult, EventStatus, ProjectInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    AwaitingGeneration,
    AwaitingTransformation,
}

impl Category {
    fn source_statuses(&self) -> [EventStatus; 2] {
        match self {
            Category::AwaitingGeneration => [EventStatus::New, EventStatus::GenerationRecoverableFailure],
            Category::AwaitingTransformation => {
                [EventStatus::TriplesGenerated, EventStatus::TransformationRecoverableFailure]
            }
        }
    }

    fn target_status(&self) -> EventStatus {
        match self {
            Category::AwaitingGeneration => EventStatus::GeneratingTriples,
            Category::AwaitingTransformation => EventStatus::TransformingTriples,
        }
    }

    fn requires_payload(&self) -> bool {
        matches!(self, Category::AwaitingTransformation)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProjectPriority {
    pub project_id: i64,
    pub priority: i64,
}

/// Injected ranking strategy, §4.5 step 1.
pub trait Prioritizer: Send + Sync {
    fn prioritize(&self, candidates: &[ProjectInfo], total_occupancy: u32) -> Vec<ProjectPriority>;
}

/// Prefers projects with the least current occupancy, breaking ties by
/// the oldest `latest_event_date` (longest-waiting project goes first).
/// `total_occupancy` is part of the trait contract for prioritizers
/// that want fleet-wide back-pressure; this default ignores it.
pub struct LeastOccupiedFirst;

impl Prioritizer for LeastOccupiedFirst {
    fn prioritize(&self, candidates: &[ProjectInfo], _total_occupancy: u32) -> Vec<ProjectPriority> {
        let mut ranked: Vec<&ProjectInfo> = candidates.iter().collect();
        ranked.sort_by(|a, b| {
            a.current_occupancy
                .cmp(&b.current_occupancy)
                .then_with(|| a.latest_event_date.cmp(&b.latest_event_date))
        });
        ranked
            .into_iter()
            .enumerate()
            .map(|(rank, p)| ProjectPriority {
                project_id: p.project_id,
                priority: -(rank as i64),
            })
            .collect()
    }
}

pub struct Finder {
    category: Category,
    prioritizer: Arc<dyn Prioritizer>,
    gauges_updater: Arc<dyn GaugesUpdater>,
    projects_fetching_limit: usize,
}

impl Finder {
    pub fn new(
        category: Category,
        prioritizer: Arc<dyn Prioritizer>,
        gauges_updater: Arc<dyn GaugesUpdater>,
        projects_fetching_limit: usize,
    ) -> Self {
        Self {
            category,
            prioritizer,
            gauges_updater,
            projects_fetching_limit,
        }
    }

    /// `popEvent()`, §4.5. `delivery_id` identifies the subscriber slot
    /// already reserved by the caller via the Subscribers Registry.
    pub async fn pop_event(&self, pool: &DbPool, delivery_id: Uuid) -> EventLogResult<Option<(Event, Option<Vec<u8>>)>> {
        let pool = pool.clone();
        let category = self.category;
        let prioritizer = self.prioritizer.clone();
        let gauges_updater = self.gauges_updater.clone();
        let limit = self.projects_fetching_limit;

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| EventLogError::Database {
                message: format!("finder: failed to get connection: {e}"),
            })?;
            pop_event_sync(&mut conn, category, prioritizer.as_ref(), limit, delivery_id, gauges_updater.as_ref())
        })
        .await
        .map_err(|e| EventLogError::Database {
            message: format!("finder task panicked: {e}"),
        })?
    }
}

#[derive(diesel::QueryableByName)]
struct CandidateRow {
    #[diesel(sql_type = BigInt)]
    project_id: i64,
    #[diesel(sql_type = Text)]
    slug: String,
    #[diesel(sql_type = Timestamptz)]
    latest_event_date: chrono::DateTime<chrono::Utc>,
    #[diesel(sql_type = BigInt)]
    current_occupancy: i64,
}

fn fetch_candidate_projects(conn: &mut PgConnection, category: Category) -> EventLogResult<Vec<ProjectInfo>> {
    let statuses: Vec<&str> = category.source_statuses().iter().map(|s| s.as_str()).collect();
    let rows: Vec<CandidateRow> = diesel::sql_query(
        "SELECT p.project_id, p.slug, p.latest_event_date,
                (SELECT COUNT(*) FROM event e2
                 WHERE e2.project_id = p.project_id
                   AND e2.status IN ('generating_triples', 'transforming_triples', 'awaiting_deletion', 'deleting')
                ) AS current_occupancy
         FROM project p
         WHERE EXISTS (
             SELECT 1 FROM event e
             WHERE e.project_id = p.project_id
               AND e.status = ANY($1)
               AND e.execution_date <= now()
         )",
    )
    .bind::<diesel::sql_types::Array<Text>, _>(statuses)
    .load(conn)
    .map_err(|e| EventLogError::Database {
        message: format!("finder: fetching candidates: {e}"),
    })?;

    Ok(rows
        .into_iter()
        .map(|row| ProjectInfo {
            project_id: row.project_id,
            slug: row.slug,
            latest_event_date: row.latest_event_date,
            current_occupancy: row.current_occupancy.max(0) as u32,
        })
        .collect())
}

#[derive(diesel::QueryableByName)]
struct LatestStatusRow {
    #[diesel(sql_type = Text)]
    status: String,
}

#[derive(diesel::QueryableByName)]
struct CandidateEventRow {
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    event_id: Uuid,
    #[diesel(sql_type = Text)]
    status: String,
    #[diesel(sql_type = diesel::sql_types::Bool)]
    has_payload: bool,
}

fn pop_event_sync(
    conn: &mut PgConnection,
    category: Category,
    prioritizer: &dyn Prioritizer,
    limit: usize,
    delivery_id: Uuid,
    gauges_updater: &dyn GaugesUpdater,
) -> EventLogResult<Option<(Event, Option<Vec<u8>>)>> {
    let candidates = fetch_candidate_projects(conn, category)?;
    if candidates.is_empty() {
        return Ok(None);
    }
    let total_occupancy: u32 = candidates.iter().map(|c| c.current_occupancy).sum();
    let mut prioritized = prioritizer.prioritize(&candidates, total_occupancy);
    prioritized.sort_by(|a, b| b.priority.cmp(&a.priority));

    for p in prioritized.into_iter().take(limit.max(1)) {
        let slug = candidates
            .iter()
            .find(|c| c.project_id == p.project_id)
            .map(|c| c.slug.clone())
            .unwrap_or_default();

        let outcome = conn.transaction::<Option<(Event, Option<Vec<u8>>, DbUpdateResults)>, diesel::result::Error, _>(
            |conn| try_pop_for_project(conn, category, p.project_id, &slug, delivery_id),
        );

        match outcome {
            Ok(Some((event, payload, results))) => {
                if let Err(e) = gauges_updater.update_gauges(&results) {
                    tracing::warn!(error = %e, "finder: gauges update failed after committed pop");
                }
                return Ok(Some((event, payload)));
            }
            Ok(None) => continue,
            Err(e) => {
                tracing::error!(error = %e, project_id = p.project_id, "finder: pop attempt failed, aborting");
                return Ok(None);
            }
        }
    }

    Ok(None)
}

fn try_pop_for_project(
    conn: &mut PgConnection,
    category: Category,
    project_id: i64,
    slug: &str,
    delivery_id: Uuid,
) -> Result<Option<(Event, Option<Vec<u8>>, DbUpdateResults)>, diesel::result::Error> {
    let latest: Option<LatestStatusRow> = diesel::sql_query(
        "SELECT status FROM event WHERE project_id = $1 ORDER BY event_date DESC LIMIT 1",
    )
    .bind::<BigInt, _>(project_id)
    .get_result(conn)
    .optional()?;

    if let Some(latest) = &latest {
        if let Ok(status) = latest.status.parse::<EventStatus>() {
            if status.is_active_for_generation_finder() {
                return Ok(None);
            }
        }
    }

    let source_statuses: Vec<&str> = category.source_statuses().iter().map(|s| s.as_str()).collect();
    let candidate_events: Vec<CandidateEventRow> = diesel::sql_query(
        "SELECT e.event_id, e.status,
                EXISTS (SELECT 1 FROM event_payload ep WHERE ep.event_id = e.event_id AND ep.project_id = e.project_id) AS has_payload
         FROM event e
         WHERE e.project_id = $1 AND e.status = ANY($2) AND e.execution_date <= now()
         ORDER BY e.event_date DESC",
    )
    .bind::<BigInt, _>(project_id)
    .bind::<diesel::sql_types::Array<Text>, _>(source_statuses)
    .load(conn)?;

    let chosen = if category.requires_payload() {
        candidate_events.into_iter().find(|e| e.has_payload)
    } else {
        candidate_events.into_iter().next()
    };

    let Some(chosen) = chosen else {
        return Ok(None);
    };

    let from_status = chosen.status.parse::<EventStatus>().unwrap_or(category.source_statuses()[0]);
    let to_status = category.target_status();

    let affected = diesel::sql_query(
        "UPDATE event SET status = $1, execution_date = now() WHERE event_id = $2 AND project_id = $3",
    )
    .bind::<Text, _>(to_status.as_str())
    .bind::<diesel::sql_types::Uuid, _>(chosen.event_id)
    .bind::<BigInt, _>(project_id)
    .execute(conn)?;

    if affected == 0 {
        return Ok(None);
    }

    diesel::sql_query(
        "INSERT INTO event_delivery (event_id, project_id, delivery_id) VALUES ($1, $2, $3)
         ON CONFLICT (event_id, project_id) WHERE event_id IS NOT NULL DO UPDATE SET delivery_id = EXCLUDED.delivery_id",
    )
    .bind::<diesel::sql_types::Nullable<diesel::sql_types::Uuid>, _>(Some(chosen.event_id))
    .bind::<BigInt, _>(project_id)
    .bind::<diesel::sql_types::Uuid, _>(delivery_id)
    .execute(conn)?;

    #[derive(diesel::QueryableByName)]
    struct FullEventRow {
        #[diesel(sql_type = diesel::sql_types::Uuid)]
        event_id: Uuid,
        #[diesel(sql_type = BigInt)]
        project_id: i64,
        #[diesel(sql_type = Text)]
        status: String,
        #[diesel(sql_type = Timestamptz)]
        created_date: chrono::DateTime<chrono::Utc>,
        #[diesel(sql_type = Timestamptz)]
        execution_date: chrono::DateTime<chrono::Utc>,
        #[diesel(sql_type = Timestamptz)]
        event_date: chrono::DateTime<chrono::Utc>,
        #[diesel(sql_type = Timestamptz)]
        batch_date: chrono::DateTime<chrono::Utc>,
        #[diesel(sql_type = diesel::sql_types::Jsonb)]
        event_body: serde_json::Value,
        #[diesel(sql_type = diesel::sql_types::Nullable<Text>)]
        message: Option<String>,
    }

    let full: FullEventRow = diesel::sql_query(
        "SELECT event_id, project_id, status, created_date, execution_date, event_date, batch_date, event_body, message
         FROM event WHERE event_id = $1 AND project_id = $2",
    )
    .bind::<diesel::sql_types::Uuid, _>(chosen.event_id)
    .bind::<BigInt, _>(project_id)
    .get_result(conn)?;

    let payload: Option<Vec<u8>> = if chosen.has_payload {
        #[derive(diesel::QueryableByName)]
        struct PayloadRow {
            #[diesel(sql_type = diesel::sql_types::Bytea)]
            payload: Vec<u8>,
        }
        let row: Option<PayloadRow> = diesel::sql_query(
            "SELECT payload FROM event_payload WHERE event_id = $1 AND project_id = $2",
        )
        .bind::<diesel::sql_types::Uuid, _>(chosen.event_id)
        .bind::<BigInt, _>(project_id)
        .get_result(conn)
        .optional()?;
        row.map(|r| r.payload)
    } else {
        None
    };

    let event = Event {
        event_id: full.event_id,
        project_id: full.project_id,
        status: to_status,
        created_date: full.created_date,
        execution_date: full.execution_date,
        event_date: full.event_date,
        batch_date: full.batch_date,
        event_body: full.event_body,
        message: full.message,
    };

    let _ = latest;
    let mut deltas: HashMap<EventStatus, i64> = HashMap::new();
    *deltas.entry(from_status).or_insert(0) -= 1;
    *deltas.entry(to_status).or_insert(0) += 1;

    Ok(Some((event, payload, DbUpdateResults::single_project(slug, deltas))))
}
