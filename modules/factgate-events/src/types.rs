//! Records returned by the store's read methods.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use factgate_common::{Fact, Identifier};

/// A fact as recorded by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFact {
    pub seq: i64,
    pub recorded_at: DateTime<Utc>,
    /// Structural version hash of the fact's kind at the time it was written.
    pub type_version: String,
    /// Direct cause within the store, if the fact was appended through a handle.
    pub parent_seq: Option<i64>,
    /// Root of the causal chain. Equals `seq` for root facts.
    pub caused_by_seq: i64,
    pub fact: Fact,
}

/// Facts recorded for one subject, in append order.
#[derive(Debug, Clone)]
pub struct EventStream {
    pub subject: Identifier,
    /// Type version hash of the most recent record, `None` for an empty stream.
    pub version: Option<String>,
    pub facts: Vec<StoredFact>,
}

impl EventStream {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Sequence number of the last fact, 0 when empty.
    pub fn last_seq(&self) -> i64 {
        self.facts.last().map(|f| f.seq).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.iter().map(|s| &s.fact)
    }
}
