//! Entity Model - Resources as Property Graphs
//!
//! An entity is an optional identifier plus an ordered map from predicate key
//! to a list of values. A value is a literal, a reference to another
//! resource, or a nested entity that is inlined into its parent.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::vocab;

/// Ordered property map. A key that is present always has a (possibly empty) list.
pub type Properties = IndexMap<String, Vec<Value>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    Literal(String),
    Reference(String),
    Nested(Entity),
}

impl Value {
    pub fn literal(value: impl Into<String>) -> Self {
        Value::Literal(value.into())
    }

    pub fn reference(iri: impl Into<String>) -> Self {
        Value::Reference(iri.into())
    }

    /// Lexical text of a literal or reference. Nested entities yield their id.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Literal(s) | Value::Reference(s) => Some(s),
            Value::Nested(entity) => entity.id.as_deref(),
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Nested(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_entity_mut(&mut self) -> Option<&mut Entity> {
        match self {
            Value::Nested(entity) => Some(entity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub properties: Properties,
}

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            properties: Properties::new(),
        }
    }

    /// Builder-style append of a single value.
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.push(key, value);
        self
    }

    pub fn with_type(self, entity_type: &str) -> Self {
        self.with(vocab::RDF_TYPE, Value::reference(entity_type))
    }

    pub fn push(&mut self, key: &str, value: Value) {
        self.properties.entry(key.to_string()).or_default().push(value);
    }

    /// Values for `key`; an absent key reads as an empty list.
    pub fn values(&self, key: &str) -> &[Value] {
        self.properties.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set(&mut self, key: &str, values: Vec<Value>) {
        self.properties.insert(key.to_string(), values);
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<Value>> {
        self.properties.shift_remove(key)
    }

    /// Removes every occurrence of `value` under `key`. Returns whether anything was removed.
    pub fn remove_value(&mut self, key: &str, value: &Value) -> bool {
        match self.properties.get_mut(key) {
            Some(values) => {
                let before = values.len();
                values.retain(|v| v != value);
                before != values.len()
            }
            None => false,
        }
    }

    pub fn first_str(&self, key: &str) -> Option<&str> {
        self.values(key).iter().find_map(Value::as_str)
    }

    pub fn entity_type(&self) -> Option<&str> {
        self.first_str(vocab::RDF_TYPE)
    }

    /// The permanent identifier: the id of the nested PID entity.
    pub fn pid_uri(&self) -> Option<&str> {
        self.values(vocab::HAS_PID)
            .iter()
            .find_map(|v| v.as_entity().and_then(|e| e.id.as_deref()))
    }

    pub fn base_uri(&self) -> Option<&str> {
        self.values(vocab::HAS_BASE_URI)
            .iter()
            .find_map(|v| match v {
                Value::Nested(e) => e.id.as_deref(),
                other => other.as_str(),
            })
    }

    /// Nested entities held under `key`.
    pub fn nested(&self, key: &str) -> impl Iterator<Item = &Entity> {
        self.values(key).iter().filter_map(Value::as_entity)
    }

    /// Follows a path of `(key, index)` steps through nested values.
    pub fn at_path_mut(&mut self, path: &[(String, usize)]) -> Option<&mut Entity> {
        let mut current = self;
        for (key, index) in path {
            current = current
                .properties
                .get_mut(key)?
                .get_mut(*index)?
                .as_entity_mut()?;
        }
        Some(current)
    }
}
