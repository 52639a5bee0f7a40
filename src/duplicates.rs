//! Duplicate Resolver - Identifier Uniqueness Across Drafts and Published Resources
//!
//! The verdict for one identifier is decided from every corpus occurrence of
//! its literal value. The repository is queried read-only; a race between
//! this check and the caller's commit is not resolved here.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::entity::{Entity, Value};
use crate::external::{ExternalError, OccurrenceRepository, VersionChainProvider};
use crate::validation::{ResultKind, Severity, ValidationResultProperty};
use crate::vocab;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentifierKind {
    PidUri,
    BaseUri,
    TargetUri,
}

/// One corpus occurrence of an identifier value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateResult {
    #[serde(default)]
    pub draft: Option<String>,
    #[serde(default)]
    pub published: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    pub identifier_kind: IdentifierKind,
}

impl DuplicateResult {
    pub fn is_orphaned(&self) -> bool {
        self.draft.is_none() && self.published.is_none()
    }

    pub fn is_owned_by(&self, id: &str) -> bool {
        self.draft.as_deref() == Some(id) || self.published.as_deref() == Some(id)
    }

    pub fn owner(&self) -> Option<&str> {
        self.draft.as_deref().or(self.published.as_deref())
    }

    fn owners(&self) -> impl Iterator<Item = &str> {
        self.draft.as_deref().into_iter().chain(self.published.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionOverview {
    pub pid_uri: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub base_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Unique,
    Duplicate { orphaned: bool, owner: Option<String> },
}

/// An identifier found in the submission.
#[derive(Debug, Clone)]
struct Candidate {
    value: String,
    kind: IdentifierKind,
    node: String,
    path: &'static str,
}

pub struct DuplicateResolver<'a> {
    occurrences: &'a dyn OccurrenceRepository,
    versions: &'a dyn VersionChainProvider,
}

impl<'a> DuplicateResolver<'a> {
    pub fn new(occurrences: &'a dyn OccurrenceRepository, versions: &'a dyn VersionChainProvider) -> Self {
        Self { occurrences, versions }
    }

    /// Checks the PID URI, the base URI and every nested endpoint identifier
    /// and target URI of `entity` against the corpus and against each other.
    pub fn check_duplicates(
        &self,
        entity: &Entity,
        persisted_id: Option<&str>,
        previous_version: Option<&str>,
    ) -> Vec<ValidationResultProperty> {
        let mut candidates = Vec::new();
        let root = entity
            .pid_uri()
            .or(entity.id.as_deref())
            .unwrap_or_default()
            .to_string();
        collect_candidates(entity, &root, &mut candidates);

        let mut results = Vec::new();
        let entity_type = entity.entity_type();

        for candidate in &candidates {
            let occurrences = match self.occurrences.find_occurrences(&candidate.value) {
                Ok(occurrences) => occurrences,
                Err(e) => {
                    results.push(lookup_failure(candidate, &e));
                    continue;
                }
            };

            let chain = if candidate.kind == IdentifierKind::BaseUri {
                match self.version_chain(entity.pid_uri(), previous_version, persisted_id) {
                    Ok(chain) => Some(chain),
                    Err(e) => {
                        results.push(lookup_failure(candidate, &e));
                        continue;
                    }
                }
            } else {
                None
            };

            let verdict = resolve(&occurrences, entity_type, persisted_id, chain.as_ref());
            if let Verdict::Duplicate { orphaned, owner } = verdict {
                tracing::debug!(value = %candidate.value, ?candidate.kind, orphaned, "duplicate identifier");
                results.push(duplicate_result(candidate, orphaned, owner.as_deref()));
            }
        }

        results.extend(within_submission(&candidates));
        results
    }

    fn version_chain(
        &self,
        pid_uri: Option<&str>,
        previous_version: Option<&str>,
        persisted_id: Option<&str>,
    ) -> Result<HashSet<String>, ExternalError> {
        let mut chain: HashSet<String> = pid_uri
            .into_iter()
            .chain(persisted_id)
            .map(str::to_string)
            .collect();
        if let Some(start) = previous_version.or(pid_uri) {
            chain.insert(start.to_string());
            chain.extend(self.versions.version_chain(start)?.into_iter().map(|v| v.pid_uri));
        }
        Ok(chain)
    }
}

/// Decides whether the occurrences make the value a duplicate.
///
/// `chain` is only passed for base URIs: owners inside the checking entity's
/// version chain may share the value.
pub fn resolve(
    occurrences: &[DuplicateResult],
    entity_type: Option<&str>,
    persisted_id: Option<&str>,
    chain: Option<&HashSet<String>>,
) -> Verdict {
    if occurrences.is_empty() {
        return Verdict::Unique;
    }

    if occurrences.iter().any(DuplicateResult::is_orphaned) {
        return Verdict::Duplicate { orphaned: true, owner: None };
    }

    if let Some(chain) = chain {
        if occurrences
            .iter()
            .any(|o| o.owners().any(|owner| chain.contains(owner)))
        {
            return Verdict::Unique;
        }
    }

    let foreign_owner = || {
        occurrences
            .iter()
            .find(|o| persisted_id.map_or(true, |id| !o.is_owned_by(id)))
            .and_then(|o| o.owner().map(str::to_string))
    };

    let id = match persisted_id {
        Some(id) => id,
        None => {
            return Verdict::Duplicate { orphaned: false, owner: foreign_owner() };
        }
    };

    if !occurrences.iter().any(|o| o.is_owned_by(id)) {
        return Verdict::Duplicate { orphaned: false, owner: foreign_owner() };
    }

    let type_changed = occurrences
        .iter()
        .any(|o| o.is_owned_by(id) && o.resource_type.as_deref() != entity_type);
    if type_changed && !is_type_migration(occurrences) {
        return Verdict::Duplicate { orphaned: false, owner: Some(id.to_string()) };
    }

    Verdict::Unique
}

/// Exactly two occurrences declaring two different types: the draft and the
/// published copy of a resource whose type is being changed. Only reached
/// when the checking entity is already persisted.
fn is_type_migration(occurrences: &[DuplicateResult]) -> bool {
    match occurrences {
        [a, b] => a.resource_type != b.resource_type,
        _ => false,
    }
}

fn collect_candidates(entity: &Entity, node: &str, out: &mut Vec<Candidate>) {
    if let Some(pid) = entity.pid_uri() {
        out.push(Candidate {
            value: pid.to_string(),
            kind: IdentifierKind::PidUri,
            node: node.to_string(),
            path: vocab::HAS_PID,
        });
    }
    if let Some(base) = entity.base_uri() {
        out.push(Candidate {
            value: base.to_string(),
            kind: IdentifierKind::BaseUri,
            node: node.to_string(),
            path: vocab::HAS_BASE_URI,
        });
    }
    for target in entity.values(vocab::HAS_NETWORK_ADDRESS).iter().filter_map(Value::as_str) {
        out.push(Candidate {
            value: target.to_string(),
            kind: IdentifierKind::TargetUri,
            node: node.to_string(),
            path: vocab::HAS_NETWORK_ADDRESS,
        });
    }

    for (key, values) in &entity.properties {
        if key == vocab::HAS_PID || key == vocab::HAS_BASE_URI {
            continue;
        }
        for nested in values.iter().filter_map(Value::as_entity) {
            let nested_node = nested
                .pid_uri()
                .or(nested.id.as_deref())
                .unwrap_or(node)
                .to_string();
            collect_candidates(nested, &nested_node, out);
        }
    }
}

/// Same value used twice within one submission: one result per extra occurrence.
fn within_submission(candidates: &[Candidate]) -> Vec<ValidationResultProperty> {
    let mut seen: HashMap<(bool, &str), usize> = HashMap::new();
    let mut results = Vec::new();

    for candidate in candidates {
        if candidate.kind == IdentifierKind::BaseUri {
            continue;
        }
        let key = (candidate.kind == IdentifierKind::TargetUri, candidate.value.as_str());
        let count = seen.entry(key).or_insert(0);
        *count += 1;
        if *count > 1 {
            let severity = severity_for(candidate.kind, false);
            results.push(
                ValidationResultProperty::new(
                    candidate.node.clone(),
                    candidate.path,
                    format!("The identifier {} is used more than once in this resource", candidate.value),
                    severity,
                    ResultKind::Duplicate,
                )
                .with_value(candidate.value.clone())
                .with_constraint("duplicate:submission"),
            );
        }
    }

    results
}

fn severity_for(kind: IdentifierKind, orphaned: bool) -> Severity {
    match (kind, orphaned) {
        (IdentifierKind::TargetUri, _) => Severity::Info,
        (_, true) => Severity::Warning,
        (_, false) => Severity::Violation,
    }
}

fn duplicate_result(candidate: &Candidate, orphaned: bool, owner: Option<&str>) -> ValidationResultProperty {
    let message = if orphaned {
        format!(
            "The identifier {} belongs to a deleted resource and cannot be reused yet",
            candidate.value
        )
    } else if candidate.kind == IdentifierKind::TargetUri {
        format!("The target URI {} is already used by another resource", candidate.value)
    } else {
        format!("The identifier {} is already in use", candidate.value)
    };

    let result = ValidationResultProperty::new(
        candidate.node.clone(),
        candidate.path,
        message,
        severity_for(candidate.kind, orphaned),
        ResultKind::Duplicate,
    )
    .with_value(candidate.value.clone())
    .with_constraint(if orphaned { "duplicate:orphaned" } else { "duplicate:corpus" });

    match owner {
        Some(owner) => result.with_duplicate(owner),
        None => result,
    }
}

fn lookup_failure(candidate: &Candidate, error: &ExternalError) -> ValidationResultProperty {
    tracing::warn!(value = %candidate.value, %error, "duplicate check unavailable");
    ValidationResultProperty::new(
        candidate.node.clone(),
        candidate.path,
        format!("Uniqueness of {} could not be verified: {}", candidate.value, error),
        Severity::Warning,
        ResultKind::Duplicate,
    )
    .with_value(candidate.value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occurrence(draft: Option<&str>, published: Option<&str>, ty: &str) -> DuplicateResult {
        DuplicateResult {
            draft: draft.map(str::to_string),
            published: published.map(str::to_string),
            resource_type: Some(ty.to_string()),
            identifier_kind: IdentifierKind::PidUri,
        }
    }

    #[test]
    fn test_no_occurrences_is_unique() {
        assert_eq!(resolve(&[], Some("T"), None, None), Verdict::Unique);
    }

    #[test]
    fn test_orphan_wins() {
        let occ = vec![occurrence(None, None, "T"), occurrence(Some("a"), None, "T")];
        assert_eq!(
            resolve(&occ, Some("T"), Some("a"), None),
            Verdict::Duplicate { orphaned: true, owner: None }
        );
    }

    #[test]
    fn test_create_with_existing_value_is_duplicate() {
        let occ = vec![occurrence(Some("a"), None, "T")];
        assert_eq!(
            resolve(&occ, Some("T"), None, None),
            Verdict::Duplicate { orphaned: false, owner: Some("a".into()) }
        );
    }

    #[test]
    fn test_owned_elsewhere_is_duplicate() {
        let occ = vec![occurrence(Some("b"), Some("b"), "T")];
        assert!(matches!(resolve(&occ, Some("T"), Some("a"), None), Verdict::Duplicate { .. }));
    }

    #[test]
    fn test_own_value_is_unique() {
        let occ = vec![occurrence(Some("a"), Some("a"), "T")];
        assert_eq!(resolve(&occ, Some("T"), Some("a"), None), Verdict::Unique);
    }

    #[test]
    fn test_type_change_is_duplicate() {
        let occ = vec![occurrence(Some("a"), None, "Old")];
        assert!(matches!(resolve(&occ, Some("New"), Some("a"), None), Verdict::Duplicate { .. }));
    }

    #[test]
    fn test_type_migration_exception() {
        let occ = vec![occurrence(Some("a"), None, "New"), occurrence(None, Some("a"), "Old")];
        assert_eq!(resolve(&occ, Some("New"), Some("a"), None), Verdict::Unique);
    }

    #[test]
    fn test_type_migration_exception_is_narrow() {
        let occ = vec![
            occurrence(Some("a"), None, "New"),
            occurrence(None, Some("a"), "Old"),
            occurrence(None, Some("a"), "Old"),
        ];
        assert!(matches!(resolve(&occ, Some("New"), Some("a"), None), Verdict::Duplicate { .. }));
    }

    #[test]
    fn test_version_chain_suppresses_base_uri() {
        let occ = vec![occurrence(None, Some("v1"), "T")];
        let chain: HashSet<String> = ["v1".to_string(), "v2".to_string()].into_iter().collect();
        assert_eq!(resolve(&occ, Some("T"), None, Some(&chain)), Verdict::Unique);
    }

    #[test]
    fn test_within_submission_duplicates() {
        let candidates = vec![
            Candidate { value: "t".into(), kind: IdentifierKind::TargetUri, node: "n".into(), path: vocab::HAS_NETWORK_ADDRESS },
            Candidate { value: "t".into(), kind: IdentifierKind::TargetUri, node: "m".into(), path: vocab::HAS_NETWORK_ADDRESS },
            Candidate { value: "t".into(), kind: IdentifierKind::TargetUri, node: "o".into(), path: vocab::HAS_NETWORK_ADDRESS },
            Candidate { value: "p".into(), kind: IdentifierKind::PidUri, node: "n".into(), path: vocab::HAS_PID },
        ];
        let results = within_submission(&candidates);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.severity == Severity::Info));
    }
}
