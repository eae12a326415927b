//! EventStore: append-only fact store with write-through to a durable backing.
//!
//! Readers see a fact only after the backing accepted it. Appends are
//! serialized by the log lock, so sequence order matches visibility order.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use factgate_common::{Fact, FactBuilder, Identifier};

use crate::backing::{FactBacking, MemoryBacking};
use crate::types::{EventStream, StoredFact};

// ---------------------------------------------------------------------------
// EventStore
// ---------------------------------------------------------------------------

/// Append-only fact store. The single source of truth.
///
/// Cheap to clone; all clones share one log.
#[derive(Clone)]
pub struct EventStore {
    log: Arc<RwLock<Log>>,
    backing: Arc<dyn FactBacking>,
}

#[derive(Default)]
struct Log {
    records: Vec<StoredFact>,
    by_identifier: HashMap<Identifier, usize>,
    by_subject: HashMap<Identifier, Vec<usize>>,
}

impl Log {
    fn next_seq(&self) -> i64 {
        self.records.len() as i64 + 1
    }

    fn get(&self, seq: i64) -> Option<&StoredFact> {
        usize::try_from(seq - 1)
            .ok()
            .and_then(|idx| self.records.get(idx))
    }
}

/// Stream a fact belongs to: its subject, or itself when it has none.
fn stream_key(fact: &Fact) -> Identifier {
    match fact.subject() {
        Some(subject) => subject.entity_id().clone(),
        None => fact.identified().clone(),
    }
}

fn backing_key(id: &Identifier) -> String {
    id.to_string()
}

impl EventStore {
    pub fn new(backing: Arc<dyn FactBacking>) -> Self {
        Self {
            log: Arc::new(RwLock::new(Log::default())),
            backing,
        }
    }

    /// Store backed by process memory only.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBacking::new()))
    }

    /// Append a root fact. Returns a handle for appending facts it causes.
    ///
    /// No deduplication: appending the same fact twice records it twice and
    /// the identifier index points at the latest copy. Callers needing
    /// idempotence check `find_event_from` first.
    pub async fn append(&self, fact: Fact) -> Result<EventHandle> {
        let stored = self.write(fact, None, None).await?;
        Ok(self.handle_for(stored))
    }

    async fn write(
        &self,
        fact: Fact,
        parent_seq: Option<i64>,
        caused_by_seq: Option<i64>,
    ) -> Result<StoredFact> {
        let id = fact.identified().clone();

        let mut log = self.log.write().await;
        let seq = log.next_seq();
        let stored = StoredFact {
            seq,
            recorded_at: Utc::now(),
            type_version: fact.type_version(),
            parent_seq,
            caused_by_seq: caused_by_seq.unwrap_or(seq),
            fact,
        };

        let record = serde_json::to_value(&stored)?;
        self.backing
            .append(&backing_key(&id), record)
            .await
            .with_context(|| format!("backing store rejected fact {id}"))?;
        debug!(seq, identifier = %id, fact_type = ?stored.fact.type_name(), "Fact appended");

        let idx = log.records.len();
        if log.by_identifier.insert(id.clone(), idx).is_some() {
            warn!(identifier = %id, "Fact appended again under an existing identifier");
        }
        log.by_subject
            .entry(stream_key(&stored.fact))
            .or_default()
            .push(idx);
        log.records.push(stored.clone());

        Ok(stored)
    }

    fn handle_for(&self, stored: StoredFact) -> EventHandle {
        EventHandle {
            seq: stored.seq,
            caused_by: stored.caused_by_seq,
            fact: stored.fact,
            store: self.clone(),
        }
    }

    /// Point lookup by identifier. Falls back to the backing for facts this
    /// process has not indexed. Unknown identifiers yield `Ok(None)`.
    pub async fn find_event_from(&self, id: &Identifier) -> Result<Option<Fact>> {
        {
            let log = self.log.read().await;
            if let Some(&idx) = log.by_identifier.get(id) {
                return Ok(Some(log.records[idx].fact.clone()));
            }
        }

        let Some(record) = self.backing.get(&backing_key(id)).await? else {
            return Ok(None);
        };
        let stored: StoredFact = serde_json::from_value(record)
            .with_context(|| format!("undecodable record for {id}"))?;
        Ok(Some(stored.fact))
    }

    /// Read a single record by sequence number.
    pub async fn read_event(&self, seq: i64) -> Option<StoredFact> {
        self.log.read().await.get(seq).cloned()
    }

    /// Read records in sequence order starting from `seq_start` (inclusive).
    pub async fn read_from(&self, seq_start: i64, limit: usize) -> Vec<StoredFact> {
        let log = self.log.read().await;
        let start = usize::try_from(seq_start.max(1) - 1).unwrap_or(0);
        log.records.iter().skip(start).take(limit).cloned().collect()
    }

    /// Every fact recorded for a subject, in append order.
    pub async fn load_stream(&self, subject: &Identifier) -> EventStream {
        self.load_stream_after(subject, 0).await
    }

    /// Facts recorded for a subject with a sequence number above `after_seq`.
    pub async fn load_stream_after(&self, subject: &Identifier, after_seq: i64) -> EventStream {
        let log = self.log.read().await;
        let facts: Vec<StoredFact> = log
            .by_subject
            .get(subject)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&idx| &log.records[idx])
                    .filter(|s| s.seq > after_seq)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        EventStream {
            subject: subject.clone(),
            version: facts.last().map(|s| s.type_version.clone()),
            facts,
        }
    }

    /// The causal tree rooted at a record: the root plus everything it caused.
    pub async fn read_tree(&self, root_seq: i64) -> Vec<StoredFact> {
        let log = self.log.read().await;
        log.records
            .iter()
            .filter(|s| s.caused_by_seq == root_seq || s.seq == root_seq)
            .cloned()
            .collect()
    }

    /// Direct children of a record.
    pub async fn read_children(&self, parent_seq: i64) -> Vec<StoredFact> {
        let log = self.log.read().await;
        log.records
            .iter()
            .filter(|s| s.parent_seq == Some(parent_seq))
            .cloned()
            .collect()
    }

    /// The latest sequence number, or 0 if nothing was appended.
    pub async fn latest_seq(&self) -> i64 {
        self.log.read().await.records.len() as i64
    }
}

// ---------------------------------------------------------------------------
// EventHandle: causal chaining
// ---------------------------------------------------------------------------

/// Handle returned by append(). Use to append facts caused by this one.
pub struct EventHandle {
    seq: i64,
    caused_by: i64,
    fact: Fact,
    store: EventStore,
}

impl EventHandle {
    /// Append a child fact caused by this one. The child's prior reference is
    /// set to this fact and it inherits the correlation id.
    pub async fn append(&self, child: FactBuilder) -> Result<EventHandle> {
        let child = child.caused_by(&self.fact)?.build()?;
        let stored = self
            .store
            .write(child, Some(self.seq), Some(self.caused_by))
            .await?;
        Ok(self.store.handle_for(stored))
    }

    /// This fact's sequence number.
    pub fn seq(&self) -> i64 {
        self.seq
    }

    /// The root sequence number of this causal chain.
    pub fn caused_by(&self) -> i64 {
        self.caused_by
    }

    pub fn fact(&self) -> &Fact {
        &self.fact
    }
}
