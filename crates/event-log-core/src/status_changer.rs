//! `StatusChanger::update_statuses`, §4.3 "Operation": open a
//! transaction, run the variant's updater, commit, then update gauges
//! best-effort; on transactional failure invoke the updater's rollback
//! hook before re-raising.

use std::cell::RefCell;
use std::sync::Arc;

use diesel::prelude::*;

use event_log_db::DbPool;
use event_log_types::{DbUpdateResults, EventLogError, EventLogResult, StatusChangeEvent};

use crate::gauges::GaugesUpdater;
use crate::updaters::updater_for;

pub struct StatusChanger {
    pool: DbPool,
    gauges_updater: Arc<dyn GaugesUpdater>,
}

impl StatusChanger {
    pub fn new(pool: DbPool, gauges_updater: Arc<dyn GaugesUpdater>) -> Self {
        Self { pool, gauges_updater }
    }

    pub async fn update_statuses(&self, event: StatusChangeEvent) -> EventLogResult<DbUpdateResults> {
        let pool = self.pool.clone();
        let gauges_updater = self.gauges_updater.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| EventLogError::Database {
                message: format!("status change: failed to get connection: {e}"),
            })?;
            update_statuses_sync(&mut conn, gauges_updater.as_ref(), event)
        })
        .await
        .map_err(|e| EventLogError::Database {
            message: format!("status change task panicked: {e}"),
        })?
    }
}

/// The synchronous core of `update_statuses`, factored out so it can be
/// exercised directly against a `PgConnection` in tests without the
/// `spawn_blocking`/pool machinery.
pub fn update_statuses_sync(
    conn: &mut PgConnection,
    gauges_updater: &dyn GaugesUpdater,
    event: StatusChangeEvent,
) -> EventLogResult<DbUpdateResults> {
    let updater = updater_for(&event);
    let captured_error: RefCell<Option<EventLogError>> = RefCell::new(None);

    let tx_result = conn.transaction::<DbUpdateResults, diesel::result::Error, _>(|conn| {
        updater.update_db(conn, &event).map_err(|e| {
            *captured_error.borrow_mut() = Some(e);
            diesel::result::Error::RollbackTransaction
        })
    });

    match tx_result {
        Ok(results) => {
            if let Err(e) = gauges_updater.update_gauges(&results) {
                tracing::warn!(error = %e, "gauges update failed after committed status change");
            }
            Ok(results)
        }
        Err(diesel_err) => {
            let original = captured_error.into_inner().unwrap_or_else(|| EventLogError::Database {
                message: format!("status change transaction failed: {diesel_err}"),
            });

            tracing::error!(error = %original, "status change transaction failed; invoking rollback hook");

            let handled = updater.on_rollback(conn, &event, &original).unwrap_or(false);
            if handled {
                Ok(DbUpdateResults::Empty)
            } else {
                Err(original)
            }
        }
    }
}
