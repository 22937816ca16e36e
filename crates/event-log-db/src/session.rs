//! Connection pool setup, mirroring `db::session` in the workflow
//! engine.

use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;

use event_log_types::{EventLogError, EventLogResult};

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub fn init_pool(database_url: &str) -> EventLogResult<DbPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .build(manager)
        .map_err(|e| EventLogError::Configuration {
            message: format!("failed to create database connection pool: {e}"),
        })
}
