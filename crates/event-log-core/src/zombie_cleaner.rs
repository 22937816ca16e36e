//! The "zombie status cleaner", §7 "Lost work detection": periodically
//! resets events stuck in an in-flight status whose delivery has not
//! progressed in longer than a threshold, and deletes the stale
//! `event_delivery` row. Mirrors the Status Changer's
//! transaction-then-gauge-update shape but runs as a scheduled sweep
//! rather than in response to a caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text, Timestamptz, Uuid as SqlUuid};
use uuid::Uuid;

use event_log_db::DbPool;
use event_log_types::{DbUpdateResults, EventLogError, EventLogResult, EventStatus};

use crate::gauges::GaugesUpdater;

/// `(stuck status, reset-to status)` pairs named in §7.
const RESET_TARGETS: [(EventStatus, EventStatus); 3] = [
    (EventStatus::GeneratingTriples, EventStatus::New),
    (EventStatus::TransformingTriples, EventStatus::TriplesGenerated),
    (EventStatus::Deleting, EventStatus::AwaitingDeletion),
];

pub struct ZombieCleaner {
    pool: DbPool,
    gauges_updater: Arc<dyn GaugesUpdater>,
    stuck_threshold: chrono::Duration,
}

impl ZombieCleaner {
    pub fn new(pool: DbPool, gauges_updater: Arc<dyn GaugesUpdater>, stuck_threshold: Duration) -> Self {
        Self {
            pool,
            gauges_updater,
            stuck_threshold: chrono::Duration::from_std(stuck_threshold).unwrap_or(chrono::Duration::minutes(30)),
        }
    }

    /// Runs one sweep, resetting every stuck event found across all
    /// three in-flight statuses. Returns the number of events reset.
    pub async fn run_once(&self) -> EventLogResult<usize> {
        let pool = self.pool.clone();
        let gauges_updater = self.gauges_updater.clone();
        let threshold = self.stuck_threshold;

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| EventLogError::Database {
                message: format!("zombie cleaner: failed to get connection: {e}"),
            })?;
            run_sweep(&mut conn, gauges_updater.as_ref(), threshold)
        })
        .await
        .map_err(|e| EventLogError::Database {
            message: format!("zombie cleaner task panicked: {e}"),
        })?
    }
}

#[derive(diesel::QueryableByName)]
struct ZombieRow {
    #[diesel(sql_type = SqlUuid)]
    event_id: Uuid,
    #[diesel(sql_type = BigInt)]
    project_id: i64,
    #[diesel(sql_type = Text)]
    slug: String,
}

fn run_sweep(
    conn: &mut PgConnection,
    gauges_updater: &dyn GaugesUpdater,
    threshold: chrono::Duration,
) -> EventLogResult<usize> {
    let mut reset_count = 0;
    let cutoff = Utc::now() - threshold;

    for (stuck_status, reset_status) in RESET_TARGETS {
        let rows: Vec<ZombieRow> = diesel::sql_query(
            "SELECT e.event_id, e.project_id, p.slug
             FROM event e JOIN project p ON p.project_id = e.project_id
             WHERE e.status = $1 AND e.execution_date < $2",
        )
        .bind::<Text, _>(stuck_status.as_str())
        .bind::<Timestamptz, _>(cutoff)
        .load(conn)
        .map_err(|e| EventLogError::Database {
            message: format!("zombie cleaner: scanning {}: {e}", stuck_status.as_str()),
        })?;

        for row in rows {
            let result = conn.transaction::<DbUpdateResults, diesel::result::Error, _>(|conn| {
                reset_one(conn, row.event_id, row.project_id, &row.slug, stuck_status, reset_status)
            });

            match result {
                Ok(results) => {
                    reset_count += 1;
                    if let Err(e) = gauges_updater.update_gauges(&results) {
                        tracing::warn!(error = %e, "zombie cleaner: gauges update failed after reset");
                    }
                    tracing::warn!(
                        event_id = %row.event_id,
                        project_id = row.project_id,
                        from = stuck_status.as_str(),
                        to = reset_status.as_str(),
                        "zombie cleaner: reset stuck event"
                    );
                }
                Err(e) => tracing::error!(error = %e, event_id = %row.event_id, "zombie cleaner: reset attempt failed"),
            }
        }
    }

    Ok(reset_count)
}

fn reset_one(
    conn: &mut PgConnection,
    event_id: Uuid,
    project_id: i64,
    slug: &str,
    from_status: EventStatus,
    to_status: EventStatus,
) -> Result<DbUpdateResults, diesel::result::Error> {
    let affected = diesel::sql_query(
        "UPDATE event SET status = $1, execution_date = now() WHERE event_id = $2 AND project_id = $3 AND status = $4",
    )
    .bind::<Text, _>(to_status.as_str())
    .bind::<SqlUuid, _>(event_id)
    .bind::<BigInt, _>(project_id)
    .bind::<Text, _>(from_status.as_str())
    .execute(conn)?;

    if affected == 0 {
        return Ok(DbUpdateResults::Empty);
    }

    diesel::sql_query("DELETE FROM event_delivery WHERE event_id = $1 AND project_id = $2")
        .bind::<SqlUuid, _>(event_id)
        .bind::<BigInt, _>(project_id)
        .execute(conn)?;

    let mut deltas: HashMap<EventStatus, i64> = HashMap::new();
    *deltas.entry(from_status).or_insert(0) -= 1;
    *deltas.entry(to_status).or_insert(0) += 1;

    Ok(DbUpdateResults::single_project(slug, deltas))
}

/// Spawns the periodic sweep as a detached Tokio task, mirroring
/// `event_log_registry::spawn_checker`'s shape.
pub fn spawn(cleaner: Arc<ZombieCleaner>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = cleaner.run_once().await {
                tracing::error!(error = %e, "zombie cleaner sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_targets_match_the_stuck_statuses_named_in_the_error_handling_design() {
        let stuck: Vec<EventStatus> = RESET_TARGETS.iter().map(|(from, _)| *from).collect();
        assert!(stuck.contains(&EventStatus::GeneratingTriples));
        assert!(stuck.contains(&EventStatus::TransformingTriples));
        assert!(stuck.contains(&EventStatus::Deleting));
    }

    #[test]
    fn each_stuck_status_resets_to_its_named_recovery_status() {
        for (from, to) in RESET_TARGETS {
            match from {
                EventStatus::GeneratingTriples => assert_eq!(to, EventStatus::New),
                EventStatus::TransformingTriples => assert_eq!(to, EventStatus::TriplesGenerated),
                EventStatus::Deleting => assert_eq!(to, EventStatus::AwaitingDeletion),
                other => panic!("unexpected stuck status in RESET_TARGETS: {other:?}"),
            }
        }
    }
}
