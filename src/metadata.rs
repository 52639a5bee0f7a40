//! Metadata - Per-Type Property Constraints
//!
//! Metadata is supplied by an external provider and drives both the shape
//! graph and validator dispatch.

use serde::{Deserialize, Serialize};

use crate::validation::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    #[serde(rename = "IRI")]
    Iri,
    Literal,
    BlankNode,
    #[serde(rename = "BlankNodeOrIRI")]
    BlankNodeOrIri,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataProperty {
    pub key: String,
    #[serde(default)]
    pub datatype: Option<String>,
    #[serde(default)]
    pub node_kind: Option<NodeKind>,
    /// Class the values refer to (`sh:class` in shape terms).
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub min_count: Option<u32>,
    #[serde(default)]
    pub max_count: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub field_type: Option<String>,
    #[serde(default)]
    pub is_taxonomy: bool,
    #[serde(default)]
    pub severity: Severity,
    /// Metadata of entity types inlined under this key (e.g. distribution endpoints).
    #[serde(default)]
    pub nested: Vec<NestedMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedMetadata {
    pub entity_type: String,
    pub properties: Vec<MetadataProperty>,
}

impl MetadataProperty {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn is_mandatory(&self) -> bool {
        self.min_count.unwrap_or(0) > 0
    }

    /// Metadata for a nested entity of the given type, if this key inlines it.
    pub fn nested_for(&self, entity_type: &str) -> Option<&[MetadataProperty]> {
        self.nested
            .iter()
            .find(|n| n.entity_type == entity_type)
            .map(|n| n.properties.as_slice())
    }
}

pub fn find<'a>(metadata: &'a [MetadataProperty], key: &str) -> Option<&'a MetadataProperty> {
    metadata.iter().find(|m| m.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mandatory() {
        let mut prop = MetadataProperty::new("urn:k");
        assert!(!prop.is_mandatory());
        prop.min_count = Some(1);
        assert!(prop.is_mandatory());
    }

    #[test]
    fn test_deserialize_defaults() {
        let prop: MetadataProperty = serde_json::from_str(
            r#"{"key": "urn:k", "nodeKind": "IRI", "minCount": 1}"#,
        )
        .unwrap();
        assert_eq!(prop.node_kind, Some(NodeKind::Iri));
        assert_eq!(prop.severity, Severity::Violation);
        assert!(prop.nested.is_empty());
    }
}
