//! State store: the latest record of every canonical topic.
//!
//! All writes go through one mutex, so an update computes its new record
//! from the previous one atomically and returns both.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use busscripts_domain::state::{Decoded, StateRecord};
use busscripts_domain::time::{Timestamp, now};
use serde_json::Value;

/// Result of a write: the stored record and the one it replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub record: StateRecord,
    pub previous: Option<StateRecord>,
}

impl Update {
    /// Whether the value differs from the previous one (or is new).
    #[must_use]
    pub fn changed(&self) -> bool {
        self.previous
            .as_ref()
            .is_none_or(|prev| prev.value != self.record.value)
    }
}

/// In-memory topic → record map.
#[derive(Debug, Default)]
pub struct StateStore {
    records: Mutex<HashMap<String, StateRecord>>,
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `payload` and store it under `topic`.
    pub fn update(&self, topic: &str, payload: &str) -> Update {
        self.write(topic, Decoded::from_payload(payload))
    }

    /// Store an already decoded value, timestamped now unless it carries
    /// its own timestamp.
    pub fn write(&self, topic: &str, decoded: Decoded) -> Update {
        self.write_at(topic, decoded, now())
    }

    /// [`write`](Self::write) with an explicit clock reading.
    pub fn write_at(&self, topic: &str, decoded: Decoded, at: Timestamp) -> Update {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = records.get(topic).cloned();
        let record = StateRecord::next(decoded, previous.as_ref(), at);
        records.insert(topic.to_string(), record.clone());
        Update { record, previous }
    }

    /// Store `decoded` unless it is identical (value and timestamp) to the
    /// stored record. Returns `None` when it was ignored.
    pub fn write_unless_echo(&self, topic: &str, decoded: Decoded) -> Option<Update> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = records.get(topic).cloned();
        if let (Some(prev), Some(ts)) = (&previous, decoded.timestamp)
            && prev.value == decoded.value
            && prev.timestamp == ts
        {
            return None;
        }
        let record = StateRecord::next(decoded, previous.as_ref(), now());
        records.insert(topic.to_string(), record.clone());
        Some(Update { record, previous })
    }

    /// The stored record for `topic`, if any.
    #[must_use]
    pub fn get(&self, topic: &str) -> Option<StateRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
    }

    /// The stored value for `topic`, if any.
    #[must_use]
    pub fn value(&self, topic: &str) -> Option<Value> {
        self.get(topic).map(|record| record.value)
    }

    /// Number of topics seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
