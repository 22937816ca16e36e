//! The gauges-updater capability consumed by the Status Changer, §4.3
//! step 2. The concrete prometheus-backed implementation lives in
//! `event-log-api`; this crate only depends on the trait so the state
//! machine stays free of any metrics library.

use event_log_types::{DbUpdateResults, EventLogResult};

pub trait GaugesUpdater: Send + Sync {
    /// Applies the per-project, per-status deltas. Best-effort: the
    /// status change has already committed by the time this runs, so a
    /// failure here is logged by the caller, never propagated as a
    /// reason to roll back.
    fn update_gauges(&self, results: &DbUpdateResults) -> EventLogResult<()>;
}

/// Discards every update. Used where gauge observability is wired up
/// later (tests, and any binary that doesn't expose `/metrics`).
pub struct NoopGaugesUpdater;

impl GaugesUpdater for NoopGaugesUpdater {
    fn update_gauges(&self, _results: &DbUpdateResults) -> EventLogResult<()> {
        Ok(())
    }
}
