//! Shape Graph - Constraints Derived From Metadata
//!
//! The shape graph is built once per process from every entity type the
//! metadata provider knows and is read-only afterwards. Range (class)
//! constraints are not checked directly: referenced resources are not inlined
//! into the canonical graph. Ranges of inlined nested types become node
//! shapes targeting that class instead.

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::external::{ExternalError, MetadataProvider};
use crate::metadata::{MetadataProperty, NodeKind};
use crate::validation::Severity;

#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("Metadata unavailable: {0}")]
    Metadata(#[from] ExternalError),

    #[error("No shapes could be built: metadata provider knows no entity types")]
    NoShapes,

    #[error("Invalid pattern on {key}: {source}")]
    InvalidPattern {
        key: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
pub struct PropertyShape {
    pub id: String,
    pub path: String,
    pub datatype: Option<String>,
    pub node_kind: Option<NodeKind>,
    pub pattern: Option<Regex>,
    pub min_count: Option<u32>,
    pub max_count: Option<u32>,
    pub severity: Severity,
}

impl PropertyShape {
    fn from_metadata(target_class: &str, property: &MetadataProperty) -> Result<Self, ShapeError> {
        let pattern = property
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|source| ShapeError::InvalidPattern {
                key: property.key.clone(),
                source,
            })?;

        Ok(Self {
            id: format!("{}#{}", target_class, property.key),
            path: property.key.clone(),
            datatype: property.datatype.clone(),
            node_kind: property.node_kind,
            pattern,
            min_count: property.min_count,
            max_count: property.max_count,
            severity: property.severity,
        })
    }

    pub fn is_mandatory(&self) -> bool {
        self.min_count.unwrap_or(0) > 0
    }
}

#[derive(Debug, Clone)]
pub struct NodeShape {
    pub target_class: String,
    pub properties: Vec<PropertyShape>,
}

#[derive(Debug, Default)]
pub struct ShapeGraph {
    shapes: IndexMap<String, NodeShape>,
    removed_class_constraints: usize,
}

impl ShapeGraph {
    pub fn build(provider: &dyn MetadataProvider) -> Result<Self, ShapeError> {
        let types = provider.entity_types()?;
        if types.is_empty() {
            return Err(ShapeError::NoShapes);
        }
        let mut metadata = Vec::with_capacity(types.len());
        for entity_type in types {
            let properties = provider.metadata_for_entity_type(&entity_type)?;
            metadata.push((entity_type, properties));
        }
        Self::from_metadata(metadata)
    }

    pub fn from_metadata(
        types: impl IntoIterator<Item = (String, Vec<MetadataProperty>)>,
    ) -> Result<Self, ShapeError> {
        let mut graph = Self::default();
        for (entity_type, properties) in types {
            graph.add_node_shape(&entity_type, &properties)?;
        }
        tracing::debug!(
            shapes = graph.shapes.len(),
            removed_class_constraints = graph.removed_class_constraints,
            "built shape graph"
        );
        Ok(graph)
    }

    fn add_node_shape(&mut self, target_class: &str, properties: &[MetadataProperty]) -> Result<(), ShapeError> {
        if self.shapes.contains_key(target_class) {
            return Ok(());
        }

        let mut shapes = Vec::with_capacity(properties.len());
        for property in properties {
            shapes.push(PropertyShape::from_metadata(target_class, property)?);
            if property.range.is_some() {
                self.removed_class_constraints += 1;
            }
        }
        self.shapes.insert(
            target_class.to_string(),
            NodeShape {
                target_class: target_class.to_string(),
                properties: shapes,
            },
        );

        for property in properties {
            for nested in &property.nested {
                self.add_node_shape(&nested.entity_type, &nested.properties)?;
            }
        }
        Ok(())
    }

    pub fn shape_for(&self, class: &str) -> Option<&NodeShape> {
        self.shapes.get(class)
    }

    pub fn shapes(&self) -> impl Iterator<Item = &NodeShape> {
        self.shapes.values()
    }

    pub fn removed_class_constraints(&self) -> usize {
        self.removed_class_constraints
    }
}

/// Single-flight, lazily built shape graph.
///
/// Concurrent first callers block on one construction; later callers share
/// the result. `invalidate` swaps in an empty cell so the next caller rebuilds.
pub struct ShapeCache {
    cell: RwLock<Arc<OnceCell<Arc<ShapeGraph>>>>,
    builds: AtomicU64,
}

impl ShapeCache {
    pub fn new() -> Self {
        Self {
            cell: RwLock::new(Arc::new(OnceCell::new())),
            builds: AtomicU64::new(0),
        }
    }

    pub fn get_or_build(&self, provider: &dyn MetadataProvider) -> Result<Arc<ShapeGraph>, ShapeError> {
        let cell = self.cell.read().clone();
        let graph = cell.get_or_try_init(|| {
            self.builds.fetch_add(1, Ordering::Relaxed);
            ShapeGraph::build(provider).map(Arc::new)
        })?;
        Ok(Arc::clone(graph))
    }

    pub fn invalidate(&self) {
        *self.cell.write() = Arc::new(OnceCell::new());
        tracing::info!("shape graph invalidated");
    }

    pub fn is_built(&self) -> bool {
        self.cell.read().get().is_some()
    }

    /// Number of construction attempts so far.
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }
}

impl Default for ShapeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCatalog;
    use crate::metadata::NestedMetadata;

    fn catalog() -> InMemoryCatalog {
        let mut catalog = InMemoryCatalog::new();
        let mut distribution = MetadataProperty::new("urn:distribution");
        distribution.range = Some("urn:Endpoint".into());
        distribution.nested = vec![NestedMetadata {
            entity_type: "urn:Endpoint".into(),
            properties: vec![MetadataProperty::new("urn:address")],
        }];
        let mut label = MetadataProperty::new("urn:label");
        label.min_count = Some(1);
        catalog.add_metadata("urn:Dataset", vec![label, distribution]);
        catalog
    }

    #[test]
    fn test_nested_range_becomes_target_class() {
        let graph = ShapeGraph::build(&catalog()).unwrap();
        assert!(graph.shape_for("urn:Dataset").is_some());
        let endpoint = graph.shape_for("urn:Endpoint").unwrap();
        assert_eq!(endpoint.properties[0].path, "urn:address");
        assert_eq!(graph.removed_class_constraints(), 1);
    }

    #[test]
    fn test_empty_provider_is_configuration_error() {
        let err = ShapeGraph::build(&InMemoryCatalog::new()).unwrap_err();
        assert!(matches!(err, ShapeError::NoShapes));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut prop = MetadataProperty::new("urn:k");
        prop.pattern = Some("(".into());
        let err = ShapeGraph::from_metadata(vec![("urn:T".to_string(), vec![prop])]).unwrap_err();
        assert!(matches!(err, ShapeError::InvalidPattern { .. }));
    }

    #[test]
    fn test_cache_builds_once_across_threads() {
        let cache = ShapeCache::new();
        let catalog = catalog();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    cache.get_or_build(&catalog).unwrap();
                });
            }
        });
        assert_eq!(cache.build_count(), 1);
        assert!(cache.is_built());
    }

    #[test]
    fn test_invalidate_forces_rebuild() {
        let cache = ShapeCache::new();
        let catalog = catalog();
        let first = cache.get_or_build(&catalog).unwrap();
        cache.invalidate();
        assert!(!cache.is_built());
        let second = cache.get_or_build(&catalog).unwrap();
        assert_eq!(cache.build_count(), 2);
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
