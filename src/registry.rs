#![forbid(unsafe_code)]

// Process-wide producer directory
//
// Unifies producers created over WHIP ingest and over socket signaling into
// one id-keyed view. The registry stores plain records, never engine handles:
// only the owning resource or session can close a producer, and a removed
// owner leaves nothing here that could keep a closed producer alive.

use mediasoup::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock as StdRwLock;

/// Which path created a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerSource {
    Whip,
    Socket,
}

/// Owning entity of a producer, as a lookup key.
///
/// This is bookkeeping only; it never confers the right to close the
/// producer from registry code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerOwner {
    Whip { resource_id: String },
    Socket { session_id: String },
}

impl ProducerOwner {
    pub fn source(&self) -> ProducerSource {
        match self {
            Self::Whip { .. } => ProducerSource::Whip,
            Self::Socket { .. } => ProducerSource::Socket,
        }
    }
}

/// One registered producer.
#[derive(Debug, Clone)]
pub struct ProducerRecord {
    pub id: ProducerId,
    pub kind: MediaKind,
    pub owner: ProducerOwner,
}

/// Directory entry as exposed to signaling clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerEntry {
    pub id: String,
    pub kind: MediaKind,
    pub source: ProducerSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl From<&ProducerRecord> for ProducerEntry {
    fn from(record: &ProducerRecord) -> Self {
        let resource_id = match &record.owner {
            ProducerOwner::Whip { resource_id } => Some(resource_id.clone()),
            ProducerOwner::Socket { .. } => None,
        };
        Self {
            id: record.id.to_string(),
            kind: record.kind,
            source: record.owner.source(),
            resource_id,
        }
    }
}

/// Registry mapping producer ids to their records.
#[derive(Default)]
pub struct ProducerRegistry {
    inner: StdRwLock<HashMap<ProducerId, ProducerRecord>>,
}

impl ProducerRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a producer under its engine-assigned id.
    pub fn insert(&self, id: ProducerId, kind: MediaKind, owner: ProducerOwner) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(id, ProducerRecord { id, kind, owner });
    }

    /// Removes a producer record. Tolerates ids that were already removed,
    /// so explicit teardown and engine close callbacks can both call it.
    pub fn remove(&self, id: &ProducerId) -> Option<ProducerRecord> {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.remove(id)
    }

    /// Looks up a producer record by id.
    pub fn get(&self, id: &ProducerId) -> Option<ProducerRecord> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(id).cloned()
    }

    /// Snapshot view over producers from both origins.
    pub fn list(&self) -> Vec<ProducerEntry> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.values().map(ProducerEntry::from).collect()
    }

    /// Number of live producer records.
    pub fn len(&self) -> usize {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
