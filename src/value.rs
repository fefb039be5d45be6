use crate::oid::Oid;
use fxhash::FxHashMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use smol_str::SmolStr;
use std::fmt;

/// A scalar value, the leaf nodes of a document tree.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ScalarValue {
    Str(SmolStr),
    Int(i64),
    Uint(u64),
    F64(f64),
    Boolean(bool),
    Null,
}

impl ScalarValue {
    pub fn is_str(&self) -> bool {
        matches!(self, Self::Str(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn to_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Uint(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Str(s) => write!(f, "\"{}\"", s),
            ScalarValue::Int(n) => write!(f, "{}", n),
            ScalarValue::Uint(n) => write!(f, "{}", n),
            ScalarValue::F64(n) => write!(f, "{}", n),
            ScalarValue::Boolean(b) => write!(f, "{}", b),
            ScalarValue::Null => write!(f, "null"),
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        ScalarValue::Str(s.into())
    }
}

impl From<String> for ScalarValue {
    fn from(s: String) -> Self {
        ScalarValue::Str(s.into())
    }
}

impl From<i64> for ScalarValue {
    fn from(n: i64) -> Self {
        ScalarValue::Int(n)
    }
}

impl From<u64> for ScalarValue {
    fn from(n: u64) -> Self {
        ScalarValue::Uint(n)
    }
}

impl From<f64> for ScalarValue {
    fn from(n: f64) -> Self {
        ScalarValue::F64(n)
    }
}

impl From<bool> for ScalarValue {
    fn from(b: bool) -> Self {
        ScalarValue::Boolean(b)
    }
}

/// A composite document value: the deep tree an application edits.
///
/// Maps and lists carry a *hidden identity*: the oid assigned when the value
/// was first normalized. The identity travels with clones, never participates
/// in equality, and never appears in the serialized form.
#[derive(Clone, Debug)]
pub enum Value {
    Scalar(ScalarValue),
    Map {
        oid: Option<Oid>,
        entries: FxHashMap<SmolStr, Value>,
    },
    List {
        oid: Option<Oid>,
        items: Vec<Value>,
    },
}

impl Value {
    pub fn map() -> Value {
        Value::Map {
            oid: None,
            entries: FxHashMap::default(),
        }
    }

    pub fn list() -> Value {
        Value::List {
            oid: None,
            items: Vec::new(),
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::Scalar(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map { .. })
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List { .. })
    }

    /// Stamp this value with an identity. Scalars carry no identity; stamping
    /// one is a no-op.
    pub fn assign_oid(&mut self, new_oid: Oid) {
        match self {
            Value::Scalar(_) => {}
            Value::Map { oid, .. } | Value::List { oid, .. } => *oid = Some(new_oid),
        }
    }

    pub fn maybe_get_oid(&self) -> Option<&Oid> {
        match self {
            Value::Scalar(_) => None,
            Value::Map { oid, .. } | Value::List { oid, .. } => oid.as_ref(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map { entries, .. } => entries.get(key),
            _ => None,
        }
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        match self {
            Value::List { items, .. } => items.get(index),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Scalar(ScalarValue::Str(s)) => serde_json::Value::String(s.to_string()),
            Value::Scalar(ScalarValue::Int(n)) => (*n).into(),
            Value::Scalar(ScalarValue::Uint(n)) => (*n).into(),
            Value::Scalar(ScalarValue::F64(n)) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Scalar(ScalarValue::Boolean(b)) => serde_json::Value::Bool(*b),
            Value::Scalar(ScalarValue::Null) => serde_json::Value::Null,
            Value::Map { entries, .. } => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
            Value::List { items, .. } => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}

/// Equality is structural: two values compare equal when their shapes and
/// scalars match, whatever identities they carry.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => a == b,
            (Value::Map { entries: a, .. }, Value::Map { entries: b, .. }) => a == b,
            (Value::List { items: a, .. }, Value::List { items: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Scalar(v) => v.serialize(serializer),
            Value::Map { entries, .. } => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::List { items, .. } => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for v in items {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Scalar(ScalarValue::Null),
            serde_json::Value::Bool(b) => Value::Scalar(ScalarValue::Boolean(b)),
            serde_json::Value::Number(n) => Value::Scalar(if let Some(i) = n.as_i64() {
                ScalarValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                ScalarValue::Uint(u)
            } else {
                ScalarValue::F64(n.as_f64().unwrap_or(f64::NAN))
            }),
            serde_json::Value::String(s) => Value::Scalar(ScalarValue::Str(s.into())),
            serde_json::Value::Array(items) => Value::List {
                oid: None,
                items: items.into_iter().map(Value::from).collect(),
            },
            serde_json::Value::Object(entries) => Value::Map {
                oid: None,
                entries: entries
                    .into_iter()
                    .map(|(k, v)| (SmolStr::new(k), Value::from(v)))
                    .collect(),
            },
        }
    }
}

impl From<ScalarValue> for Value {
    fn from(v: ScalarValue) -> Self {
        Value::Scalar(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Scalar(s.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Scalar(n.into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Scalar(n.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Scalar(b.into())
    }
}
