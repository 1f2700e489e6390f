//! Row values.
//!
//! A [`Row`] is an ordered map of field name to tagged [`Value`]. The five
//! system fields are always carried by stored rows; keys starting with `_` are
//! reserved for data the resolver attaches (labels, provenance, nested
//! relations) and can never collide with a declared column.

use std::cmp::Ordering;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const ID: &str = "id";
pub const OWNER_ID: &str = "ownerId";
pub const GRANTED: &str = "granted";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

pub const SYSTEM_FIELDS: [&str; 5] = [ID, OWNER_ID, GRANTED, CREATED_AT, UPDATED_AT];

pub const LABEL: &str = "_label";
pub const TABLE: &str = "_table";
pub const NESTED: &str = "_nested";

/// Prefix of resolver-attached keys.
pub const RESERVED_PREFIX: char = '_';

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Record(Row),
}

impl Value {
    /// Null and the empty string both count as "no value".
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Identity form used to compare ids and foreign keys across representations,
    /// so `7` and `"7"` name the same row.
    pub fn as_key(&self) -> Option<String> {
        match self {
            Self::Int(n) => Some(n.to_string()),
            Self::Text(s) if !s.is_empty() => Some(s.clone()),
            Self::Float(f) if f.fract() == 0.0 => Some(format!("{}", *f as i64)),
            _ => None,
        }
    }

    /// Scalar rendering used for human-readable labels.
    pub fn display(&self) -> Option<String> {
        match self {
            Self::Text(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Self::Int(n) => Some(n.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::Text(_) => 3,
            Self::List(_) => 4,
            Self::Record(_) => 5,
        }
    }

    /// Total order for sorting: nulls first, numbers compared numerically.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).total_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.total_cmp(&(*b as f64)),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Row> for Value {
    fn from(row: Row) -> Self {
        Self::Record(row)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(IndexMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.shift_remove(field)
    }

    /// Keep only the fields `keep` accepts, preserving order.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|k, _| keep(k));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn id(&self) -> Option<String> {
        self.get(ID).and_then(Value::as_key)
    }

    pub fn owner_id(&self) -> Option<String> {
        self.get(OWNER_ID).and_then(Value::as_key)
    }

    /// Raw publication state; absent and null read as `None`.
    pub fn granted(&self) -> Option<&Value> {
        self.get(GRANTED).filter(|v| !matches!(v, Value::Null))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
