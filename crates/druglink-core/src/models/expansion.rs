//! Expansion cache entries: externally resolved drugs missing from the formulary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FormularyRecord;

/// The external database a record came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    /// Regulatory label database (source A)
    Label,
    /// EU authorization database (source B)
    Authorization,
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::Label => write!(f, "label"),
            SourceId::Authorization => write!(f, "authorization"),
        }
    }
}

/// A previously resolved external drug kept alongside the formulary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpansionCacheEntry {
    /// Record-equivalent fields
    #[serde(flatten)]
    pub record: FormularyRecord,
    /// Source the record was resolved from
    pub source: SourceId,
    /// When the drug was first selected
    pub first_seen: DateTime<Utc>,
    /// When the drug was last selected or opened
    pub last_used: DateTime<Utc>,
    /// How many times it has been used
    pub use_count: u32,
}

impl ExpansionCacheEntry {
    pub fn new(record: FormularyRecord, source: SourceId, now: DateTime<Utc>) -> Self {
        Self {
            record,
            source,
            first_seen: now,
            last_used: now,
            use_count: 1,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Record another use.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_used = now;
        self.use_count = self.use_count.saturating_add(1);
    }
}
