//! HTTP ingress/egress, configuration, metrics and logging bootstrap for
//! the event log service, §6 "External interfaces".

pub mod config;
pub mod consumer;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod routes;

pub use config::Config;
pub use consumer::{Consumer, ConsumerCategory, ConsumerResult};
pub use error::{ApiError, ErrorBody, Severity};
