use std::collections::HashMap;

use crate::status::EventStatus;

/// Per-project, per-status gauge deltas produced by a status-change
/// updater, §4.3 step 1 and §GLOSSARY "Gauge". Commutative: deltas for
/// the same `(project, status)` key simply sum.
pub type GaugeDeltas = HashMap<EventStatus, i64>;

/// The aggregate result of one `updateDB` call, handed to the
/// gauges-updater in a best-effort manner (§4.3 step 2).
#[derive(Debug, Clone, Default, PartialEq)]
pub enum DbUpdateResults {
    /// No projects were touched (e.g. a project without an event yet).
    #[default]
    Empty,
    /// Deltas scoped to specific projects, keyed by slug.
    ForProjects(HashMap<String, GaugeDeltas>),
    /// Deltas that apply identically to every project (unused by any
    /// current updater, but part of the contract so new updaters can
    /// express a fleet-wide change without enumerating projects).
    ForAllProjects(GaugeDeltas),
}

impl DbUpdateResults {
    pub fn single_project(slug: impl Into<String>, deltas: GaugeDeltas) -> Self {
        let mut map = HashMap::new();
        map.insert(slug.into(), deltas);
        DbUpdateResults::ForProjects(map)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, DbUpdateResults::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_project_wraps_one_entry() {
        let mut deltas = GaugeDeltas::new();
        deltas.insert(EventStatus::TriplesGenerated, 1);
        deltas.insert(EventStatus::GeneratingTriples, -1);

        let results = DbUpdateResults::single_project("group/proj", deltas.clone());
        match results {
            DbUpdateResults::ForProjects(map) => {
                assert_eq!(map.get("group/proj"), Some(&deltas));
            }
            _ => panic!("expected ForProjects"),
        }
    }

    #[test]
    fn default_is_empty() {
        assert!(DbUpdateResults::default().is_empty());
    }
}
