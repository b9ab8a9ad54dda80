//! State record (the latest known value of one topic) and payload decoding.
//!
//! Payload text is decoded with a fixed precedence:
//!
//! 1. `true` / `false` become booleans;
//! 2. text that parses as a finite number becomes a number;
//! 3. JSON: an object with a `val` key is a record, any other object or an
//!    array is wrapped as the value, other JSON scalars are taken as-is;
//! 4. anything else stays a string.
//!
//! Only the top-level shape is examined. Nested arrays and objects are kept
//! verbatim inside the value.

use serde_json::{Map, Number, Value};

use crate::time::{Timestamp, from_millis, to_millis};

/// Wire key of the value inside a record.
pub const VALUE_KEY: &str = "val";
/// Wire key of the update timestamp (ms since epoch).
pub const TIMESTAMP_KEY: &str = "ts";
/// Wire key of the last-change timestamp (ms since epoch).
pub const LAST_CHANGED_KEY: &str = "lc";

/// A payload after decoding, before it is reconciled with the previous record.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub value: Value,
    /// Timestamp carried by the payload itself, if any.
    pub timestamp: Option<Timestamp>,
    /// Additional properties of a record payload.
    pub extra: Map<String, Value>,
}

impl Decoded {
    /// Decode raw payload text.
    #[must_use]
    pub fn from_payload(payload: &str) -> Self {
        match payload {
            "true" => return Self::plain(Value::Bool(true)),
            "false" => return Self::plain(Value::Bool(false)),
            _ => {}
        }
        if let Some(number) = parse_number(payload) {
            return Self::plain(Value::Number(number));
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => Self::from_value(value),
            Err(_) => Self::plain(Value::String(payload.to_string())),
        }
    }

    /// Interpret an already-structured value (e.g. from `setValue`).
    ///
    /// An object carrying `val` is a record; everything else is the value.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut map) if map.contains_key(VALUE_KEY) => {
                let value = map.remove(VALUE_KEY).map_or(Value::Null, normalize);
                let timestamp = map
                    .remove(TIMESTAMP_KEY)
                    .and_then(|ts| ts.as_i64())
                    .and_then(from_millis);
                map.remove(LAST_CHANGED_KEY);
                Self {
                    value,
                    timestamp,
                    extra: map,
                }
            }
            other => Self::plain(normalize(other)),
        }
    }

    fn plain(value: Value) -> Self {
        Self {
            value,
            timestamp: None,
            extra: Map::new(),
        }
    }
}

/// The stored `{value, timestamp, last_changed}` tuple for one topic.
#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
    pub value: Value,
    pub timestamp: Timestamp,
    pub last_changed: Timestamp,
    pub extra: Map<String, Value>,
}

impl StateRecord {
    /// Reconcile a decoded payload with the previous record of the same topic.
    ///
    /// `last_changed` moves to the new timestamp only when the value differs;
    /// otherwise it is carried over, never later than `timestamp`.
    #[must_use]
    pub fn next(decoded: Decoded, previous: Option<&StateRecord>, now: Timestamp) -> Self {
        let timestamp = decoded.timestamp.unwrap_or(now);
        let last_changed = match previous {
            Some(prev) if prev.value == decoded.value => prev.last_changed.min(timestamp),
            _ => timestamp,
        };
        Self {
            value: decoded.value,
            timestamp,
            last_changed,
            extra: decoded.extra,
        }
    }

    /// Wire representation: `{"val": …, "ts": …, "lc": …, …extra}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map = self.extra.clone();
        map.insert(VALUE_KEY.to_string(), self.value.clone());
        map.insert(TIMESTAMP_KEY.to_string(), Value::from(to_millis(self.timestamp)));
        map.insert(
            LAST_CHANGED_KEY.to_string(),
            Value::from(to_millis(self.last_changed)),
        );
        Value::Object(map)
    }

    /// Walk `path` into the wire representation. An empty path yields the
    /// whole record; a missing segment yields `None`.
    #[must_use]
    pub fn prop(&self, path: &[&str]) -> Option<Value> {
        let mut current = self.to_json();
        for segment in path {
            current = match current {
                Value::Object(mut map) => map.remove(*segment)?,
                Value::Array(mut items) => {
                    let index: usize = segment.parse().ok()?;
                    if index >= items.len() {
                        return None;
                    }
                    items.swap_remove(index)
                }
                _ => return None,
            };
        }
        Some(current)
    }
}

fn parse_number(text: &str) -> Option<Number> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed: f64 = trimmed.parse().ok()?;
    if !parsed.is_finite() {
        return None;
    }
    Some(number_from_f64(parsed))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn number_from_f64(n: f64) -> Number {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Number::from(n as i64)
    } else {
        Number::from_f64(n).unwrap_or_else(|| Number::from(0))
    }
}

/// Integral floats become integers so `5` and `5.0` compare equal.
fn normalize(value: Value) -> Value {
    match value {
        Value::Number(n) if !n.is_i64() && !n.is_u64() => match n.as_f64() {
            Some(f) if f.is_finite() => Value::Number(number_from_f64(f)),
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, normalize(v))).collect()),
        other => other,
    }
}
