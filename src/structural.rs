//! Structural Validator - Minimal Shape Constraint Evaluation
//!
//! Covers cardinality, datatype, node kind and pattern. In lenient mode,
//! failures on non-mandatory properties are repaired by stripping the
//! offending value instead of being reported.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::sync::Arc;

use crate::entity::{Entity, Value};
use crate::external::MetadataProvider;
use crate::graph::{self, CanonicalGraph, EntityPath, Term};
use crate::metadata::{MetadataProperty, NodeKind};
use crate::shapes::{PropertyShape, ShapeCache, ShapeError, ShapeGraph};
use crate::validation::{ResultKind, ValidationResult, ValidationResultProperty};
use crate::vocab;

/// One failed constraint before it is turned into a result.
#[derive(Debug, Clone)]
struct Failure<'s> {
    subject: Term,
    shape: &'s PropertyShape,
    value: Option<Term>,
    constraint: &'static str,
    message: String,
}

pub struct StructuralValidator {
    shapes: Arc<ShapeCache>,
    provider: Arc<dyn MetadataProvider>,
}

impl StructuralValidator {
    pub fn new(shapes: Arc<ShapeCache>, provider: Arc<dyn MetadataProvider>) -> Self {
        Self { shapes, provider }
    }

    pub fn validate(
        &self,
        entity: &mut Entity,
        metadata: &[MetadataProperty],
        ignore_invalid_properties: bool,
    ) -> Result<ValidationResult, ShapeError> {
        let shapes = self.shapes.get_or_build(self.provider.as_ref())?;
        Ok(validate_with(&shapes, entity, metadata, ignore_invalid_properties))
    }
}

/// Evaluates `entity` against an already built shape graph.
pub fn validate_with(
    shapes: &ShapeGraph,
    entity: &mut Entity,
    metadata: &[MetadataProperty],
    ignore_invalid_properties: bool,
) -> ValidationResult {
    let mut graph = graph::canonicalize(entity, metadata);
    let mut failures = evaluate(shapes, &graph);

    if ignore_invalid_properties {
        let (strippable, kept): (Vec<_>, Vec<_>) =
            failures.into_iter().partition(|f| !f.shape.is_mandatory());
        strip(entity, &mut graph, &strippable);
        failures = kept;
    }

    let results = failures.into_iter().map(into_result).collect();
    ValidationResult::new(results, graph.serialize())
}

fn evaluate<'s>(shapes: &'s ShapeGraph, graph: &CanonicalGraph) -> Vec<Failure<'s>> {
    let mut failures = Vec::new();
    for node_shape in shapes.shapes() {
        for subject in graph.subjects_of_type(&node_shape.target_class) {
            for property in &node_shape.properties {
                let values = graph.objects(subject, &property.path);
                check_property(subject, property, &values, &mut failures);
            }
        }
    }
    failures
}

fn check_property<'s>(
    subject: &Term,
    shape: &'s PropertyShape,
    values: &[&Term],
    failures: &mut Vec<Failure<'s>>,
) {
    let count = values.len() as u32;
    let mut fail = |value: Option<&Term>, constraint: &'static str, message: String| {
        failures.push(Failure {
            subject: subject.clone(),
            shape,
            value: value.cloned(),
            constraint,
            message,
        });
    };

    if let Some(min) = shape.min_count {
        if count < min {
            fail(
                None,
                "sh:MinCountConstraintComponent",
                format!("Property {} requires at least {} value(s), found {}", shape.path, min, count),
            );
        }
    }
    if let Some(max) = shape.max_count {
        if count > max {
            fail(
                None,
                "sh:MaxCountConstraintComponent",
                format!("Property {} allows at most {} value(s), found {}", shape.path, max, count),
            );
        }
    }

    for value in values.iter().copied() {
        if let Some(kind) = shape.node_kind {
            if !node_kind_matches(kind, value) {
                fail(
                    Some(value),
                    "sh:NodeKindConstraintComponent",
                    format!("Value must be of node kind {:?}", kind),
                );
            }
        }

        if let Some(datatype) = &shape.datatype {
            if !datatype_matches(datatype, value) {
                fail(
                    Some(value),
                    "sh:DatatypeConstraintComponent",
                    format!("Value must be a valid literal of datatype {}", datatype),
                );
            }
        }

        if let Some(pattern) = &shape.pattern {
            let matched = match value {
                Term::Blank(_) => false,
                other => pattern.is_match(other.lexical()),
            };
            if !matched {
                fail(
                    Some(value),
                    "sh:PatternConstraintComponent",
                    format!("Value must match pattern {}", pattern.as_str()),
                );
            }
        }
    }
}

fn node_kind_matches(kind: NodeKind, value: &Term) -> bool {
    match (kind, value) {
        (NodeKind::Iri, Term::Iri(_)) => true,
        (NodeKind::Literal, Term::Literal { .. }) => true,
        (NodeKind::BlankNode, Term::Blank(_)) => true,
        (NodeKind::BlankNodeOrIri, Term::Blank(_) | Term::Iri(_)) => true,
        _ => false,
    }
}

fn datatype_matches(expected: &str, value: &Term) -> bool {
    match value {
        Term::Literal { value, datatype } => datatype == expected && lexical_form_valid(expected, value),
        _ => false,
    }
}

/// Lexical-space check for the XSD datatypes the catalog uses.
pub fn lexical_form_valid(datatype: &str, value: &str) -> bool {
    match datatype {
        vocab::XSD_DATE_TIME => {
            DateTime::parse_from_rfc3339(value).is_ok()
                || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        }
        vocab::XSD_DATE => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
        vocab::XSD_BOOLEAN => matches!(value, "true" | "false" | "1" | "0"),
        vocab::XSD_INTEGER => {
            let digits = value.strip_prefix(&['+', '-'][..]).unwrap_or(value);
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
        }
        vocab::XSD_DECIMAL => {
            let unsigned = value.strip_prefix(&['+', '-'][..]).unwrap_or(value);
            let mut parts = unsigned.splitn(2, '.');
            let int = parts.next().unwrap_or_default();
            let frac = parts.next().unwrap_or_default();
            (!int.is_empty() || !frac.is_empty())
                && int.chars().all(|c| c.is_ascii_digit())
                && frac.chars().all(|c| c.is_ascii_digit())
        }
        vocab::XSD_ANY_URI => !value.chars().any(char::is_whitespace),
        _ => true,
    }
}

/// Removes the offending values of `failures` from the entity and the graph.
fn strip(entity: &mut Entity, graph: &mut CanonicalGraph, failures: &[Failure<'_>]) {
    let mut removals: Vec<(EntityPath, String, Option<Value>)> = Vec::new();
    for failure in failures {
        let Some(path) = graph.location(&failure.subject).cloned() else {
            continue;
        };
        let value = match &failure.value {
            Some(term) => match to_value(entity, graph, term) {
                Some(value) => Some(value),
                None => continue,
            },
            None => None,
        };
        tracing::debug!(
            property = %failure.shape.path,
            constraint = failure.constraint,
            "stripping invalid non-mandatory value"
        );
        graph.remove(&failure.subject, &failure.shape.path, failure.value.as_ref());
        removals.push((path, failure.shape.path.clone(), value));
    }

    // Deeper entities first so sibling removals cannot shift their paths.
    removals.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    for (path, key, value) in removals {
        let Some(target) = entity.at_path_mut(&path) else {
            continue;
        };
        match value {
            Some(value) => {
                target.remove_value(&key, &value);
            }
            None => {
                target.remove(&key);
            }
        }
    }
}

/// Maps a graph object back to the entity value it was built from.
fn to_value(entity: &mut Entity, graph: &CanonicalGraph, term: &Term) -> Option<Value> {
    match term {
        Term::Literal { value, .. } => Some(Value::Literal(value.clone())),
        Term::Iri(iri) => match graph.location(term) {
            Some(path) if !path.is_empty() => entity.at_path_mut(path).map(|e| Value::Nested(e.clone())),
            _ => Some(Value::Reference(iri.clone())),
        },
        Term::Blank(_) => {
            let path = graph.location(term)?;
            entity.at_path_mut(path).map(|e| Value::Nested(e.clone()))
        }
    }
}

fn into_result(failure: Failure<'_>) -> ValidationResultProperty {
    let result = ValidationResultProperty::new(
        failure.subject.lexical(),
        failure.shape.path.clone(),
        failure.message,
        failure.shape.severity,
        ResultKind::Structural,
    )
    .with_constraint(format!("{} ({})", failure.constraint, failure.shape.id));

    match failure.value {
        Some(value) => result.with_value(value.lexical()),
        None => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Severity;

    const DATASET: &str = "urn:Dataset";

    fn metadata() -> Vec<MetadataProperty> {
        let mut label = MetadataProperty::new("urn:label");
        label.min_count = Some(1);
        label.datatype = Some(vocab::XSD_STRING.into());

        let mut keyword = MetadataProperty::new("urn:keyword");
        keyword.min_count = Some(0);
        keyword.pattern = Some("^[a-z]+$".into());

        let mut homepage = MetadataProperty::new("urn:homepage");
        homepage.node_kind = Some(NodeKind::Iri);
        homepage.max_count = Some(1);

        vec![label, keyword, homepage]
    }

    fn shapes() -> ShapeGraph {
        ShapeGraph::from_metadata(vec![(DATASET.to_string(), metadata())]).unwrap()
    }

    #[test]
    fn test_missing_mandatory_property_is_violation() {
        let mut entity = Entity::with_id("urn:r").with_type(DATASET);
        let before = entity.clone();

        let result = validate_with(&shapes(), &mut entity, &metadata(), false);
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.severity(), Some(Severity::Violation));
        assert_eq!(result.results[0].path, "urn:label");
        assert_eq!(entity, before);
    }

    #[test]
    fn test_lenient_mode_strips_non_mandatory_value() {
        let mut entity = Entity::with_id("urn:r")
            .with_type(DATASET)
            .with("urn:label", Value::literal("Sales"))
            .with("urn:keyword", Value::literal("Bad Keyword"))
            .with("urn:keyword", Value::literal("good"));

        let result = validate_with(&shapes(), &mut entity, &metadata(), true);
        assert!(result.conforms());
        assert_eq!(entity.values("urn:keyword"), &[Value::literal("good")]);
        assert!(!result.triples.contains("Bad Keyword"));
    }

    #[test]
    fn test_lenient_mode_keeps_mandatory_failures() {
        let mut entity = Entity::with_id("urn:r").with_type(DATASET);
        let result = validate_with(&shapes(), &mut entity, &metadata(), true);
        assert_eq!(result.results.len(), 1);
    }

    #[test]
    fn test_strict_mode_reports_pattern_failure() {
        let mut entity = Entity::with_id("urn:r")
            .with_type(DATASET)
            .with("urn:label", Value::literal("Sales"))
            .with("urn:keyword", Value::literal("Bad Keyword"));

        let result = validate_with(&shapes(), &mut entity, &metadata(), false);
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].value.as_deref(), Some("Bad Keyword"));
        assert!(result.results[0]
            .source_constraint
            .as_deref()
            .unwrap()
            .starts_with("sh:PatternConstraintComponent"));
    }

    #[test]
    fn test_node_kind_and_max_count() {
        let mut entity = Entity::with_id("urn:r")
            .with_type(DATASET)
            .with("urn:label", Value::literal("Sales"))
            .with("urn:homepage", Value::literal("not an iri"))
            .with("urn:homepage", Value::reference("https://example.com"));

        let result = validate_with(&shapes(), &mut entity, &metadata(), false);
        let constraints: Vec<_> = result
            .results
            .iter()
            .filter_map(|r| r.source_constraint.as_deref())
            .collect();
        assert_eq!(result.results.len(), 2);
        assert!(constraints.iter().any(|c| c.starts_with("sh:MaxCount")));
        assert!(constraints.iter().any(|c| c.starts_with("sh:NodeKind")));

        // without a single offending value, lenient mode drops the whole property
        let mut lenient = entity.clone();
        let result = validate_with(&shapes(), &mut lenient, &metadata(), true);
        assert!(result.conforms());
        assert!(lenient.values("urn:homepage").is_empty());
    }

    #[test]
    fn test_declared_severity_is_used() {
        let mut props = metadata();
        props[0].severity = Severity::Warning;
        let shapes = ShapeGraph::from_metadata(vec![(DATASET.to_string(), props.clone())]).unwrap();
        let mut entity = Entity::with_id("urn:r").with_type(DATASET);
        let result = validate_with(&shapes, &mut entity, &props, false);
        assert_eq!(result.severity(), Some(Severity::Warning));
    }

    #[test]
    fn test_datatype_lexical_forms() {
        assert!(lexical_form_valid(vocab::XSD_DATE_TIME, "2024-03-01T10:00:00Z"));
        assert!(!lexical_form_valid(vocab::XSD_DATE_TIME, "yesterday"));
        assert!(lexical_form_valid(vocab::XSD_INTEGER, "-12"));
        assert!(!lexical_form_valid(vocab::XSD_INTEGER, "1.5"));
        assert!(lexical_form_valid(vocab::XSD_DECIMAL, "1.5"));
        assert!(!lexical_form_valid(vocab::XSD_DECIMAL, "."));
        assert!(lexical_form_valid(vocab::XSD_BOOLEAN, "true"));
        assert!(!lexical_form_valid(vocab::XSD_ANY_URI, "has space"));
    }

    #[test]
    fn test_nested_entities_checked_against_their_shape() {
        use crate::metadata::NestedMetadata;

        let mut address = MetadataProperty::new(vocab::HAS_NETWORK_ADDRESS);
        address.min_count = Some(1);
        let mut distribution = MetadataProperty::new(vocab::DISTRIBUTION);
        distribution.nested = vec![NestedMetadata {
            entity_type: "urn:Endpoint".into(),
            properties: vec![address],
        }];
        let props = vec![distribution];
        let shapes = ShapeGraph::from_metadata(vec![(DATASET.to_string(), props.clone())]).unwrap();

        let mut entity = Entity::with_id("urn:r")
            .with_type(DATASET)
            .with(vocab::DISTRIBUTION, Value::Nested(Entity::new().with_type("urn:Endpoint")));
        let result = validate_with(&shapes, &mut entity, &props, false);
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].path, vocab::HAS_NETWORK_ADDRESS);
        assert_eq!(result.results[0].node, "b0");
    }
}
