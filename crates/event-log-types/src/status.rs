//! The event status enumeration, §3.
//!
//! Stored as the matching varchar literal in the `event.status` column;
//! `Display`/`FromStr` are the encode/decode pair the teacher's
//! tagged-union JSON types would otherwise derive through a typeclass.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    New,
    GeneratingTriples,
    TriplesGenerated,
    TransformingTriples,
    TriplesStore,
    GenerationRecoverableFailure,
    GenerationNonRecoverableFailure,
    TransformationRecoverableFailure,
    TransformationNonRecoverableFailure,
    Skipped,
    AwaitingDeletion,
    Deleting,
}

impl EventStatus {
    pub const ALL: [EventStatus; 12] = [
        EventStatus::New,
        EventStatus::GeneratingTriples,
        EventStatus::TriplesGenerated,
        EventStatus::TransformingTriples,
        EventStatus::TriplesStore,
        EventStatus::GenerationRecoverableFailure,
        EventStatus::GenerationNonRecoverableFailure,
        EventStatus::TransformationRecoverableFailure,
        EventStatus::TransformationNonRecoverableFailure,
        EventStatus::Skipped,
        EventStatus::AwaitingDeletion,
        EventStatus::Deleting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::New => "new",
            EventStatus::GeneratingTriples => "generating_triples",
            EventStatus::TriplesGenerated => "triples_generated",
            EventStatus::TransformingTriples => "transforming_triples",
            EventStatus::TriplesStore => "triples_store",
            EventStatus::GenerationRecoverableFailure => "generation_recoverable_failure",
            EventStatus::GenerationNonRecoverableFailure => "generation_non_recoverable_failure",
            EventStatus::TransformationRecoverableFailure => "transformation_recoverable_failure",
            EventStatus::TransformationNonRecoverableFailure => {
                "transformation_non_recoverable_failure"
            }
            EventStatus::Skipped => "skipped",
            EventStatus::AwaitingDeletion => "awaiting_deletion",
            EventStatus::Deleting => "deleting",
        }
    }

    /// §4.5 step 3: statuses considered "active" for the
    /// awaiting-generation finder's latest-event-date rule.
    pub fn is_active_for_generation_finder(&self) -> bool {
        matches!(
            self,
            EventStatus::GeneratingTriples
                | EventStatus::TransformingTriples
                | EventStatus::AwaitingDeletion
                | EventStatus::Deleting
                | EventStatus::TriplesStore
                | EventStatus::TransformationRecoverableFailure
        )
    }

    pub fn is_payload_mandatory(&self) -> bool {
        matches!(
            self,
            EventStatus::TriplesGenerated | EventStatus::TransformingTriples | EventStatus::TriplesStore
        )
    }

    pub fn is_payload_optional(&self) -> bool {
        matches!(self, EventStatus::AwaitingDeletion)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseEventStatusError(pub String);

impl fmt::Display for ParseEventStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized event status: {}", self.0)
    }
}

impl std::error::Error for ParseEventStatusError {}

impl FromStr for EventStatus {
    type Err = ParseEventStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(EventStatus::New),
            "generating_triples" => Ok(EventStatus::GeneratingTriples),
            "triples_generated" => Ok(EventStatus::TriplesGenerated),
            "transforming_triples" => Ok(EventStatus::TransformingTriples),
            "triples_store" => Ok(EventStatus::TriplesStore),
            "generation_recoverable_failure" => Ok(EventStatus::GenerationRecoverableFailure),
            "generation_non_recoverable_failure" => Ok(EventStatus::GenerationNonRecoverableFailure),
            "transformation_recoverable_failure" => Ok(EventStatus::TransformationRecoverableFailure),
            "transformation_non_recoverable_failure" => {
                Ok(EventStatus::TransformationNonRecoverableFailure)
            }
            "skipped" => Ok(EventStatus::Skipped),
            "awaiting_deletion" => Ok(EventStatus::AwaitingDeletion),
            "deleting" => Ok(EventStatus::Deleting),
            other => Err(ParseEventStatusError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_status_through_its_string_form() {
        for status in EventStatus::ALL {
            let parsed: EventStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn rejects_unknown_status_strings() {
        assert!("not_a_status".parse::<EventStatus>().is_err());
    }

    #[test]
    fn payload_is_mandatory_only_from_triples_generated_onward() {
        assert!(EventStatus::TriplesGenerated.is_payload_mandatory());
        assert!(EventStatus::TransformingTriples.is_payload_mandatory());
        assert!(EventStatus::TriplesStore.is_payload_mandatory());
        assert!(!EventStatus::New.is_payload_mandatory());
        assert!(!EventStatus::AwaitingDeletion.is_payload_mandatory());
    }
}
