//! Crate-wide error type.
//!
//! Lower layers never know about HTTP; this enum is wrapped into the
//! `{ "severity", "message" }` envelope only at the `event-log-api`
//! boundary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventLogError {
    #[error("database error: {message}")]
    Database { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("event {event_id} for project {project_id} not found")]
    EventNotFound { event_id: uuid::Uuid, project_id: i64 },

    #[error("invalid status transition from {from} for event {event_id}")]
    InvalidTransition { event_id: uuid::Uuid, from: String },

    #[error("no subscriber available")]
    NoSubscriberAvailable,

    #[error("serialization error: {message}")]
    Serialization { message: String },

    #[error("request to subscriber failed: {message}")]
    SubscriberRequest { message: String },

    #[error("{message}")]
    BadRequest { message: String },
}

pub type EventLogResult<T> = Result<T, EventLogError>;
