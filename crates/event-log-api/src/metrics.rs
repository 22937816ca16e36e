//! Prometheus metrics, §3 invariant 7 ("a gauge `gauge{project,status}`
//! tracks the event count per project per status") and §4.5 ("a counter
//! tracks events successfully delivered"). Registered once at startup
//! and scraped through the `GET /metrics` route.

use std::collections::HashMap;
use std::sync::Mutex;

use event_log_types::{DbUpdateResults, EventLogError, EventLogResult, EventStatus};
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// §3 invariant 7: current event count per project per status.
    pub static ref EVENT_STATUS_GAUGE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("events_by_status", "Current number of events per project per status")
            .namespace("event_log"),
        &["project", "status"]
    ).unwrap();

    /// §4.5: events successfully delivered to a subscriber, per category.
    pub static ref EVENTS_SENT_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("events_sent_total", "Total number of events successfully delivered to a subscriber")
            .namespace("event_log"),
        &["category"]
    ).unwrap();

    /// Outcomes observed by the sender, including non-fatal misdeliveries.
    pub static ref DELIVERY_OUTCOMES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("delivery_outcomes_total", "Delivery outcomes observed by the sender")
            .namespace("event_log"),
        &["category", "outcome"]
    ).unwrap();

    /// `POST /events` ingress outcomes, §4.6.
    pub static ref INGRESS_OUTCOMES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ingress_outcomes_total", "POST /events outcomes by disposition")
            .namespace("event_log"),
        &["disposition"]
    ).unwrap();

    /// Running per-project, per-status counts, kept so gauge deltas can
    /// be applied without re-querying the database (mirrors the
    /// in-process state the teacher's `RegisteredServices` gauge keeps).
    static ref GAUGE_STATE: Mutex<HashMap<(String, EventStatus), i64>> = Mutex::new(HashMap::new());
}

pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(EVENT_STATUS_GAUGE.clone()))?;
    REGISTRY.register(Box::new(EVENTS_SENT_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DELIVERY_OUTCOMES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INGRESS_OUTCOMES_TOTAL.clone()))?;
    tracing::info!("prometheus metrics registered");
    Ok(())
}

pub fn export_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder.encode_to_string(&metric_families)
}

pub fn record_sent(category: &str) {
    EVENTS_SENT_TOTAL.with_label_values(&[category]).inc();
}

pub fn record_delivery_outcome(category: &str, outcome: &str) {
    DELIVERY_OUTCOMES_TOTAL.with_label_values(&[category, outcome]).inc();
}

pub fn record_ingress_outcome(disposition: &str) {
    INGRESS_OUTCOMES_TOTAL.with_label_values(&[disposition]).inc();
}

/// Concrete `GaugesUpdater`, §4.3 step 2: applies the per-project,
/// per-status deltas produced by a status change directly to the
/// Prometheus gauge, tracking the running value itself since
/// `IntGaugeVec` exposes `set`/`add` but not a prior-value read.
pub struct PrometheusGaugesUpdater;

impl event_log_core::GaugesUpdater for PrometheusGaugesUpdater {
    fn update_gauges(&self, results: &DbUpdateResults) -> EventLogResult<()> {
        let per_project = match results {
            DbUpdateResults::Empty => return Ok(()),
            DbUpdateResults::ForProjects(map) => map.clone(),
            DbUpdateResults::ForAllProjects(_deltas) => {
                return Err(EventLogError::Database {
                    message: "updateGauges: fleet-wide deltas are not yet supported by the gauge state"
                        .to_string(),
                });
            }
        };

        let mut state = GAUGE_STATE.lock().map_err(|_| EventLogError::Database {
            message: "updateGauges: gauge state mutex poisoned".to_string(),
        })?;

        for (slug, deltas) in per_project {
            for (status, delta) in deltas {
                let key = (slug.clone(), status);
                let entry = state.entry(key).or_insert(0);
                *entry += delta;
                EVENT_STATUS_GAUGE
                    .with_label_values(&[&slug, status.as_str()])
                    .set(*entry);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_log_core::GaugesUpdater;
    use event_log_types::GaugeDeltas;

    #[test]
    fn applies_deltas_cumulatively_to_the_gauge() {
        let _ = init_metrics();
        let updater = PrometheusGaugesUpdater;

        let mut deltas = GaugeDeltas::new();
        deltas.insert(EventStatus::New, 1);
        updater.update_gauges(&DbUpdateResults::single_project("metrics-test/proj", deltas)).unwrap();

        let mut more = GaugeDeltas::new();
        more.insert(EventStatus::New, 2);
        updater.update_gauges(&DbUpdateResults::single_project("metrics-test/proj", more)).unwrap();

        let value = EVENT_STATUS_GAUGE.with_label_values(&["metrics-test/proj", "new"]).get();
        assert_eq!(value, 3);
    }

    #[test]
    fn rejects_fleet_wide_deltas() {
        let updater = PrometheusGaugesUpdater;
        let result = updater.update_gauges(&DbUpdateResults::ForAllProjects(GaugeDeltas::new()));
        assert!(result.is_err());
    }
}
