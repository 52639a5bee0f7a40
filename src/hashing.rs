//! Hashing System - SHA-256 for Change Detection
//!
//! The entity hash is canonical: independent of property order and of the
//! order of sibling values, blind to bookkeeping properties and to
//! identifiers. Two submissions with the same content hash to the same digest.

use serde::Serialize;
use serde_json::{to_string, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::entity::{Entity, Value};
use crate::vocab;

/// Properties that change without the content changing.
pub const DEFAULT_IGNORED_KEYS: &[&str] = &[
    vocab::HAS_HISTORIC_VERSION,
    vocab::METADATA_GRAPH_CONFIGURATION,
    vocab::LIFECYCLE_STATUS,
    vocab::HAS_LATER_VERSION,
    vocab::CHANGE_REQUESTER,
    vocab::DATE_MODIFIED,
    vocab::LAST_CHANGE_USER,
    vocab::AUTHOR,
    vocab::DATE_CREATED,
];

#[derive(Debug, Error)]
pub enum HashError {
    #[error("Entity must not be null")]
    ArgumentNull,

    #[error("Entity has no properties left to hash after removing ignored keys")]
    MissingProperties,
}

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: JsonValue = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &JsonValue) -> JsonValue {
    match v {
        JsonValue::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let sorted_map: serde_json::Map<String, JsonValue> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_value(v)))
                .collect();
            JsonValue::Object(sorted_map)
        }
        JsonValue::Array(arr) => JsonValue::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Hash a serializable report (e.g. a validation result) via canonical JSON.
pub fn compute_report_hash<T: Serialize>(report: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(report)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Canonical entity hasher with a configurable ignore set.
#[derive(Debug, Clone)]
pub struct EntityHasher {
    ignored: BTreeSet<String>,
}

impl EntityHasher {
    pub fn new() -> Self {
        Self {
            ignored: DEFAULT_IGNORED_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Adds keys ignored by every hash this hasher computes.
    pub fn with_ignored<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Hex digest of `entity`, ignoring the configured keys plus `extra_ignored`.
    pub fn hash(&self, entity: &Entity, extra_ignored: &[&str]) -> Result<String, HashError> {
        let is_ignored = |key: &str| self.ignored.contains(key) || extra_ignored.contains(&key);

        let remaining = entity
            .properties
            .iter()
            .filter(|(key, values)| !is_ignored(key.as_str()) && !values.is_empty())
            .count();
        if remaining == 0 {
            return Err(HashError::MissingProperties);
        }

        Ok(hex::encode(entity_digest(entity, &is_ignored)))
    }

    /// As [`EntityHasher::hash`], for inputs that may be absent (e.g. a JSON `null`).
    pub fn hash_optional(&self, entity: Option<&Entity>, extra_ignored: &[&str]) -> Result<String, HashError> {
        self.hash(entity.ok_or(HashError::ArgumentNull)?, extra_ignored)
    }
}

impl Default for EntityHasher {
    fn default() -> Self {
        Self::new()
    }
}

type Digest32 = [u8; 32];

fn entity_digest(entity: &Entity, is_ignored: &dyn Fn(&str) -> bool) -> Digest32 {
    let mut properties: Vec<_> = entity
        .properties
        .iter()
        .filter(|(key, values)| !is_ignored(key.as_str()) && !values.is_empty())
        .collect();
    properties.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (key, values) in properties {
        hasher.update(property_digest(key, values, is_ignored));
    }
    hasher.finalize().into()
}

/// Sibling digests are sorted before hashing, so value order never matters.
fn property_digest(key: &str, values: &[Value], is_ignored: &dyn Fn(&str) -> bool) -> Digest32 {
    let mut digests: Vec<Digest32> = values.iter().map(|v| value_digest(v, is_ignored)).collect();
    digests.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update((key.len() as u64).to_le_bytes());
    hasher.update(key.as_bytes());
    hasher.update((digests.len() as u64).to_le_bytes());
    for digest in &digests {
        hasher.update(digest);
    }
    hasher.finalize().into()
}

fn value_digest(value: &Value, is_ignored: &dyn Fn(&str) -> bool) -> Digest32 {
    let mut hasher = Sha256::new();
    match value {
        Value::Literal(text) => {
            hasher.update(b"L:");
            hasher.update(text.as_bytes());
        }
        Value::Reference(iri) => {
            hasher.update(b"R:");
            hasher.update(iri.as_bytes());
        }
        Value::Nested(entity) => {
            hasher.update(b"N:");
            hasher.update(entity_digest(entity, is_ignored));
        }
    }
    hasher.finalize().into()
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}
