//! Validation Results - Severity-Tagged Findings
//!
//! Every stage of the engine reports into the same result type.
//! Conformance is computed from the results, never stored.

use serde::{Deserialize, Serialize};

/// Ordered so that `Info < Warning < Violation`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    #[default]
    Violation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultKind {
    Structural,
    Duplicate,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResultProperty {
    pub node: String,
    pub path: String,
    pub message: String,
    pub severity: Severity,
    pub value: Option<String>,
    pub source_constraint: Option<String>,
    pub kind: ResultKind,
    pub duplicate_of: Option<String>,
}

impl ValidationResultProperty {
    pub fn new(
        node: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        kind: ResultKind,
    ) -> Self {
        Self {
            node: node.into(),
            path: path.into(),
            message: message.into(),
            severity,
            value: None,
            source_constraint: None,
            kind,
            duplicate_of: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.source_constraint = Some(constraint.into());
        self
    }

    pub fn with_duplicate(mut self, duplicate_of: impl Into<String>) -> Self {
        self.duplicate_of = Some(duplicate_of.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub results: Vec<ValidationResultProperty>,
    /// Serialized canonical graph the structural checks ran against.
    pub triples: String,
}

impl ValidationResult {
    pub fn new(results: Vec<ValidationResultProperty>, triples: String) -> Self {
        Self { results, triples }
    }

    pub fn conforms(&self) -> bool {
        self.results.is_empty()
    }

    /// Worst severity present; `None` when the entity conforms.
    pub fn severity(&self) -> Option<Severity> {
        self.results.iter().map(|r| r.severity).max()
    }

    pub fn has_violations(&self) -> bool {
        self.severity() == Some(Severity::Violation)
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = ValidationResultProperty>) {
        self.results.extend(results);
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.results.iter().filter(|r| r.severity == severity).count()
    }
}
