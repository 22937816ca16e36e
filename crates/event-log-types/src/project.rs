use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A project known to the event log, identified by the upstream forge's
/// integer id. §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: i64,
    pub slug: String,
    pub latest_event_date: DateTime<Utc>,
}

impl Project {
    /// Invariant 3: `latest_event_date` is the max of inputs, never
    /// decreasing.
    pub fn advance_latest_event_date(&mut self, candidate: DateTime<Utc>) {
        if candidate > self.latest_event_date {
            self.latest_event_date = candidate;
        }
    }
}

/// A candidate project the prioritizer chooses between, §4.5 step 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub project_id: i64,
    pub slug: String,
    pub latest_event_date: DateTime<Utc>,
    pub current_occupancy: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn latest_event_date_never_decreases() {
        let now = Utc::now();
        let mut project = Project {
            project_id: 1,
            slug: "a/b".to_string(),
            latest_event_date: now,
        };

        project.advance_latest_event_date(now - Duration::days(1));
        assert_eq!(project.latest_event_date, now);

        let later = now + Duration::days(1);
        project.advance_latest_event_date(later);
        assert_eq!(project.latest_event_date, later);
    }
}
