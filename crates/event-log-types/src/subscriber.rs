use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// §3 `Subscriber` entity / §GLOSSARY — an external worker identified
/// by its callback URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub delivery_id: Uuid,
    pub delivery_url: String,
    pub source_url: String,
    pub capacity: Option<u32>,
}

impl Subscriber {
    /// Identity for registry lookups is the delivery URL, §4.4.
    pub fn identity(&self) -> &str {
        &self.delivery_url
    }
}
