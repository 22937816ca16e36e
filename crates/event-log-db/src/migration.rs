//! Schema Migrator, §4.1.
//!
//! Generalizes the teacher's directory-scanning, checksummed migration
//! manager to a fixed, compile-time-ordered list: migration bodies are
//! embedded with `include_str!` into [`MIGRATIONS`] in declared order,
//! new migrations are appended to that list, and each is idempotent —
//! re-running the whole set is a no-op against an up-to-date schema.

use std::time::Instant;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use sha2::{Digest, Sha256};

use event_log_types::{EventLogError, EventLogResult};

/// One embedded migration: a version stamp, a human name, and its SQL
/// body. Order in [`MIGRATIONS`] is the order of application.
pub struct Migration {
    pub version: &'static str,
    pub name: &'static str,
    pub sql: &'static str,
    /// §4.1 edge case: when set, and this table already exists before
    /// the migration body would run, the migration is a deliberate
    /// no-op (the later state is already in place) rather than applied.
    pub precheck_table: Option<&'static str>,
}

impl Migration {
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sql.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

macro_rules! migration {
    ($version:literal, $name:literal, $file:literal) => {
        Migration {
            version: $version,
            name: $name,
            sql: include_str!($file),
            precheck_table: None,
        }
    };
    ($version:literal, $name:literal, $file:literal, precheck_table = $table:literal) => {
        Migration {
            version: $version,
            name: $name,
            sql: include_str!($file),
            precheck_table: Some($table),
        }
    };
}

/// The fixed, compile-time-ordered migration sequence. Representative
/// of the kinds called out in §4.1: table rename, column add, index
/// add, new side tables, FK back-fill with cleanup, column rename.
pub static MIGRATIONS: &[Migration] = &[
    migration!(
        "20240101_000001",
        "create_project_and_event_log",
        "../migrations/20240101_000001_create_project_and_event_log.sql"
    ),
    migration!(
        "20240115_000001",
        "rename_event_log_to_event",
        "../migrations/20240115_000001_rename_event_log_to_event.sql",
        precheck_table = "event"
    ),
    migration!(
        "20240201_000001",
        "add_project_path",
        "../migrations/20240201_000001_add_project_path.sql"
    ),
    migration!(
        "20240301_000001",
        "add_event_delivery",
        "../migrations/20240301_000001_add_event_delivery.sql"
    ),
    migration!(
        "20240310_000001",
        "add_subscription_category_sync_time",
        "../migrations/20240310_000001_add_subscription_category_sync_time.sql"
    ),
    migration!(
        "20240320_000001",
        "add_clean_up_events_queue",
        "../migrations/20240320_000001_add_clean_up_events_queue.sql"
    ),
    migration!(
        "20240401_000001",
        "add_status_change_events_queue",
        "../migrations/20240401_000001_add_status_change_events_queue.sql"
    ),
    migration!(
        "20240410_000001",
        "add_project_slug",
        "../migrations/20240410_000001_add_project_slug.sql"
    ),
    migration!(
        "20240415_000001",
        "index_project_slug",
        "../migrations/20240415_000001_index_project_slug.sql"
    ),
    migration!(
        "20240420_000001",
        "backfill_cleanup_queue_project_id",
        "../migrations/20240420_000001_backfill_cleanup_queue_project_id.sql"
    ),
    migration!(
        "20240501_000001",
        "drop_project_path",
        "../migrations/20240501_000001_drop_project_path.sql"
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    Applied,
    AlreadyPresent,
    /// §4.1 edge case: a later table already exists, so this migration
    /// is a deliberate no-op rather than a checksum mismatch.
    SkippedLaterTableExists,
}

pub struct MigrationReport {
    pub version: &'static str,
    pub outcome: MigrationOutcome,
    pub execution_time_ms: i64,
}

/// Runs every migration in [`MIGRATIONS`] order, logging exactly one
/// message per migration with its outcome (§4.1 "Edge cases").
/// Migration failure is fatal (§4.1 "Failure"): the caller should
/// refuse to serve traffic if this returns `Err`.
pub fn run(pool: &Pool<ConnectionManager<PgConnection>>) -> EventLogResult<Vec<MigrationReport>> {
    let mut conn = pool.get().map_err(|e| EventLogError::Database {
        message: format!("failed to get connection for migrations: {e}"),
    })?;

    ensure_migration_table(&mut conn)?;

    let mut reports = Vec::with_capacity(MIGRATIONS.len());
    for migration in MIGRATIONS {
        let report = apply_one(&mut conn, migration)?;
        match report.outcome {
            MigrationOutcome::Applied => {
                tracing::info!(
                    version = migration.version,
                    name = migration.name,
                    ms = report.execution_time_ms,
                    "migration applied"
                );
            }
            MigrationOutcome::AlreadyPresent => {
                tracing::info!(version = migration.version, name = migration.name, "migration already present");
            }
            MigrationOutcome::SkippedLaterTableExists => {
                tracing::info!(
                    version = migration.version,
                    name = migration.name,
                    "migration skipped (later table exists)"
                );
            }
        }
        reports.push(report);
    }

    Ok(reports)
}

fn ensure_migration_table(conn: &mut PgConnection) -> EventLogResult<()> {
    diesel::sql_query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version VARCHAR(32) PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            checksum VARCHAR(64) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            execution_time_ms INTEGER NOT NULL
        )",
    )
    .execute(conn)
    .map_err(|e| EventLogError::Database {
        message: format!("failed to create schema_migrations table: {e}"),
    })?;
    Ok(())
}

fn table_exists(conn: &mut PgConnection, table: &str) -> diesel::QueryResult<bool> {
    #[derive(diesel::QueryableByName)]
    struct ExistsRow {
        #[diesel(sql_type = diesel::sql_types::Bool)]
        exists: bool,
    }

    let row: ExistsRow = diesel::sql_query(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1) AS exists",
    )
    .bind::<diesel::sql_types::Text, _>(table)
    .get_result(conn)?;

    Ok(row.exists)
}

#[derive(diesel::QueryableByName)]
struct AppliedRow {
    #[diesel(sql_type = diesel::sql_types::Text)]
    checksum: String,
}

fn apply_one(conn: &mut PgConnection, migration: &Migration) -> EventLogResult<MigrationReport> {
    let existing: Option<AppliedRow> = diesel::sql_query(
        "SELECT checksum FROM schema_migrations WHERE version = $1",
    )
    .bind::<diesel::sql_types::Text, _>(migration.version)
    .get_result(conn)
    .optional()
    .map_err(|e| EventLogError::Database {
        message: format!("failed to read schema_migrations: {e}"),
    })?;

    if let Some(row) = existing {
        if row.checksum != migration.checksum() {
            return Err(EventLogError::Configuration {
                message: format!(
                    "checksum mismatch for migration {}: migration file was modified after being applied",
                    migration.version
                ),
            });
        }
        return Ok(MigrationReport {
            version: migration.version,
            outcome: MigrationOutcome::AlreadyPresent,
            execution_time_ms: 0,
        });
    }

    let start = Instant::now();
    let checksum = migration.checksum();
    let version = migration.version;
    let name = migration.name;
    let sql = migration.sql;
    let precheck_table = migration.precheck_table;

    let skip_body = if let Some(table) = precheck_table {
        table_exists(conn, table).map_err(|e| EventLogError::Database {
            message: format!("failed to precheck table {table}: {e}"),
        })?
    } else {
        false
    };

    conn.transaction::<(), diesel::result::Error, _>(|conn| {
        if !skip_body {
            diesel::sql_query(sql).execute(conn)?;
        }

        let elapsed_ms = start.elapsed().as_millis() as i32;
        diesel::sql_query(
            "INSERT INTO schema_migrations (version, name, checksum, execution_time_ms)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (version) DO NOTHING",
        )
        .bind::<diesel::sql_types::Text, _>(version)
        .bind::<diesel::sql_types::Text, _>(name)
        .bind::<diesel::sql_types::Text, _>(&checksum)
        .bind::<diesel::sql_types::Integer, _>(elapsed_ms)
        .execute(conn)?;

        Ok(())
    })
    .map_err(|e| EventLogError::Database {
        message: format!("migration {version} failed: {e}"),
    })?;

    Ok(MigrationReport {
        version: migration.version,
        outcome: if skip_body {
            MigrationOutcome::SkippedLaterTableExists
        } else {
            MigrationOutcome::Applied
        },
        execution_time_ms: start.elapsed().as_millis() as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_declared_in_ascending_version_order() {
        let mut versions: Vec<&str> = MIGRATIONS.iter().map(|m| m.version).collect();
        let sorted = {
            let mut v = versions.clone();
            v.sort();
            v
        };
        assert_eq!(versions, sorted, "migrations must be appended in version order");
        versions.dedup();
        assert_eq!(versions.len(), MIGRATIONS.len(), "migration versions must be unique");
    }

    #[test]
    fn checksum_is_stable_for_identical_content() {
        let migration = &MIGRATIONS[0];
        assert_eq!(migration.checksum(), migration.checksum());
        assert_eq!(migration.checksum().len(), 64);
    }

    #[test]
    fn every_migration_has_nonempty_sql() {
        for migration in MIGRATIONS {
            assert!(!migration.sql.trim().is_empty(), "{} is empty", migration.version);
        }
    }
}
