//! Shared domain types for the event log service.
//!
//! This crate holds the vocabulary every other crate in the workspace
//! speaks: the event status machine, the entities from the data model,
//! the tagged `StatusChangeEvent` union consumed by the Status Changer,
//! and the crate-wide error type.

pub mod error;
pub mod event;
pub mod gauges;
pub mod project;
pub mod status;
pub mod status_change;
pub mod subscriber;

pub use error::{EventLogError, EventLogResult};
pub use event::{CategorySyncTime, CleanUpQueueEntry, Event, EventDelivery, EventPayload, StatusProcessingTime};
pub use gauges::{DbUpdateResults, GaugeDeltas};
pub use project::{Project, ProjectInfo};
pub use status::EventStatus;
pub use status_change::{
    next_execution_date, recoverable_failure_backoff, NotificationProject, ProjectEventsToNewNotification, ProjectRef,
    StatusChangeEvent,
};
pub use subscriber::Subscriber;
