//! Drains the `status_change_events_queue` outbox, §3 SUPPLEMENT: hands
//! each pending `ProjectEventsToNew` notification to an available
//! awaiting-generation subscriber and deletes the row once delivery is
//! confirmed. Mirrors the finder/sender dispatch loop's pop-then-send
//! shape, just over a plain FIFO queue instead of the event table.

use std::sync::Arc;
use std::time::Duration;

use event_log_db::DbPool;
use event_log_registry::SubscribersRegistry;
use event_log_types::{EventLogError, EventLogResult};

use crate::sender::{Sender, SendingResult};

pub struct NotificationDispatcher {
    pool: DbPool,
    registry: Arc<SubscribersRegistry>,
    sender: Arc<Sender>,
}

impl NotificationDispatcher {
    pub fn new(pool: DbPool, registry: Arc<SubscribersRegistry>, sender: Arc<Sender>) -> Self {
        Self { pool, registry, sender }
    }

    /// Delivers one pending notification, if any. Returns `false` when
    /// the outbox is currently empty, so the caller knows to back off.
    pub async fn dispatch_once(&self) -> EventLogResult<bool> {
        let claimed = {
            let pool = self.pool.clone();
            tokio::task::spawn_blocking(move || {
                let mut conn = pool.get().map_err(|e| EventLogError::Database {
                    message: format!("notification dispatcher: failed to get connection: {e}"),
                })?;
                event_log_db::store::peek_oldest_notification(&mut conn)
            })
            .await
            .map_err(|e| EventLogError::Database {
                message: format!("notification dispatcher task panicked: {e}"),
            })??
        };

        let Some((id, payload)) = claimed else {
            return Ok(false);
        };

        let subscriber_url = self.registry.find_available_subscriber().await;
        match self.sender.send_notification(&subscriber_url, &payload).await {
            Ok(SendingResult::Delivered) => self.delete(id).await?,
            Ok(SendingResult::TemporarilyUnavailable) => {
                self.registry.mark_busy(&subscriber_url);
            }
            Ok(SendingResult::Misdelivered) => {
                self.registry.delete(&subscriber_url);
            }
            Err(e) => {
                tracing::error!(error = %e, notification_id = id, "notification dispatcher: fatal client error, row left for retry");
            }
        }

        Ok(true)
    }

    async fn delete(&self, id: i64) -> EventLogResult<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| EventLogError::Database {
                message: format!("notification dispatcher: failed to get connection: {e}"),
            })?;
            event_log_db::store::delete_notification(&mut conn, id)
        })
        .await
        .map_err(|e| EventLogError::Database {
            message: format!("notification dispatcher task panicked: {e}"),
        })?
    }
}

/// Spawns the notification-dispatcher loop as a detached Tokio task.
pub fn spawn(dispatcher: Arc<NotificationDispatcher>, retry_interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match dispatcher.dispatch_once().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(retry_interval).await,
                Err(e) => {
                    tracing::error!(error = %e, "notification dispatcher: sweep failed");
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    })
}
