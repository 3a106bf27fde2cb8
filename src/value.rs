//! Core value type for state and event payloads.
//!
//! A [`Value`] is a heterogeneous tree: scalars, ordered sequences, and
//! string-keyed mappings. It is the single data currency of the crate - the
//! state store holds one `Value` as its root, and every event payload is a
//! `Value`.
//!
//! # Copy-on-write sharing
//!
//! Aggregate variants hold their contents behind `Rc`, so cloning a `Value`
//! is cheap: unwritten subtrees are shared, and the first write through
//! [`Rc::make_mut`] shallow-clones exactly the node being touched. This is
//! what lets the store hand out full clones on every read without deep-copying
//! the whole tree each time. Callers can never mutate the store's copy through
//! a clone - a write on their side splits the sharing instead.
//!
//! # JSON boundary
//!
//! Persisted-state collaborators speak JSON. [`TryFrom<&serde_json::Value>`]
//! converts a seed in (with a nesting-depth guard, see [`MAX_SEED_DEPTH`]),
//! and [`From<&Value>`] converts back out.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::StoreError;

/// Maximum nesting depth accepted when converting a JSON seed.
///
/// An owned `Value` cannot be cyclic, but a pathologically deep seed would
/// blow the stack during conversion and cloning; past this depth,
/// `initialize` fails with [`StoreError::Structural`].
pub const MAX_SEED_DEPTH: usize = 128;

// =============================================================================
// Value
// =============================================================================

/// Heterogeneous tree value: scalar, sequence, or mapping.
///
/// `Array` and `Object` contents are `Rc`-shared; see the module docs for the
/// copy-on-write contract.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Rc<Vec<Value>>),
    Object(Rc<BTreeMap<String, Value>>),
}

impl Value {
    /// Create an empty mapping.
    pub fn object() -> Self {
        Value::Object(Rc::new(BTreeMap::new()))
    }

    /// Create an empty sequence.
    pub fn array() -> Self {
        Value::Array(Rc::new(Vec::new()))
    }

    /// Build a mapping from key/value pairs.
    pub fn object_from<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(Rc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Build a sequence from values.
    pub fn array_from<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::Array(Rc::new(items.into_iter().collect()))
    }

    /// True for `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for the mapping variant.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Scalar accessors. Return `None` on variant mismatch.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a key in a mapping. `None` if absent or not a mapping.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Look up an index in a sequence. `None` if out of range or not a sequence.
    pub fn index(&self, i: usize) -> Option<&Value> {
        match self {
            Value::Array(items) => items.get(i),
            _ => None,
        }
    }

    /// Variant name, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

// =============================================================================
// JSON conversion
// =============================================================================

impl TryFrom<&serde_json::Value> for Value {
    type Error = StoreError;

    fn try_from(json: &serde_json::Value) -> Result<Self, StoreError> {
        from_json_at(json, 0)
    }
}

fn from_json_at(json: &serde_json::Value, depth: usize) -> Result<Value, StoreError> {
    if depth > MAX_SEED_DEPTH {
        return Err(StoreError::Structural { depth });
    }
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => {
            let converted: Result<Vec<Value>, StoreError> =
                items.iter().map(|v| from_json_at(v, depth + 1)).collect();
            Value::Array(Rc::new(converted?))
        }
        serde_json::Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), from_json_at(v, depth + 1)?);
            }
            Value::Object(Rc::new(out))
        }
    })
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
