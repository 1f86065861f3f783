//! Raw persisted records

use crate::uri::ObjectId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A record of one entity kind as the store sees it.
///
/// Records are untyped; callers project them into their own types through
/// [`crate::FromRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Assigned by the store on insert
    pub id: Option<ObjectId>,
    /// Entity kind name
    pub kind: String,
    /// Attribute values keyed by attribute name
    pub values: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            values: BTreeMap::new(),
        }
    }

    /// Set an attribute value, replacing any previous one
    pub fn set(&mut self, attribute: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(attribute.into(), value.into());
        self
    }

    /// Builder form of [`Record::set`]
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(attribute, value);
        self
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.values.get(attribute)
    }

    pub fn get_str(&self, attribute: &str) -> Option<&str> {
        match self.values.get(attribute) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_i64(&self, attribute: &str) -> Option<i64> {
        match self.values.get(attribute) {
            Some(Value::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    /// Integers are widened
    pub fn get_f64(&self, attribute: &str) -> Option<f64> {
        match self.values.get(attribute) {
            Some(Value::Double(f)) => Some(*f),
            Some(Value::Integer(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn get_bool(&self, attribute: &str) -> Option<bool> {
        match self.values.get(attribute) {
            Some(Value::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn remove(&mut self, attribute: &str) -> Option<Value> {
        self.values.remove(attribute)
    }
}
