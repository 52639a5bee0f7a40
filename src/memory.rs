//! In-Memory Catalog
//!
//! A fixture-backed implementation of every external collaborator, used by
//! the CLI and the tests. Loaded from a single JSON document.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::duplicates::{DuplicateResult, VersionOverview};
use crate::external::{
    ConsumerGroupPermissions, ExternalError, MetadataProvider, OccurrenceRepository,
    ReferenceChecker, TaxonomyProvider, VersionChainProvider,
};
use crate::metadata::MetadataProperty;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InMemoryCatalog {
    metadata: IndexMap<String, Vec<MetadataProperty>>,
    allowed_templates: HashMap<String, HashSet<String>>,
    default_templates: HashMap<String, String>,
    occurrences: HashMap<String, Vec<DuplicateResult>>,
    version_chains: Vec<Vec<VersionOverview>>,
    persons: HashSet<String>,
    resources: HashSet<String>,
    taxonomies: HashMap<String, HashSet<String>>,
    /// Simulates an unreachable directory for person, resource and taxonomy lookups.
    directory_offline: bool,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn add_metadata(&mut self, entity_type: &str, properties: Vec<MetadataProperty>) {
        self.metadata.insert(entity_type.to_string(), properties);
    }

    pub fn allow_template(&mut self, consumer_group: &str, template_id: &str) {
        self.allowed_templates
            .entry(consumer_group.to_string())
            .or_default()
            .insert(template_id.to_string());
    }

    pub fn set_default_template(&mut self, consumer_group: &str, template_id: &str) {
        self.default_templates
            .insert(consumer_group.to_string(), template_id.to_string());
    }

    pub fn add_occurrence(&mut self, value: &str, occurrence: DuplicateResult) {
        self.occurrences.entry(value.to_string()).or_default().push(occurrence);
    }

    pub fn add_version_chain(&mut self, chain: Vec<VersionOverview>) {
        self.version_chains.push(chain);
    }

    pub fn add_person(&mut self, email: &str) {
        self.persons.insert(email.to_string());
    }

    pub fn add_resource(&mut self, pid_uri: &str) {
        self.resources.insert(pid_uri.to_string());
    }

    pub fn add_taxonomy_term(&mut self, range: &str, term: &str) {
        self.taxonomies
            .entry(range.to_string())
            .or_default()
            .insert(term.to_string());
    }

    pub fn set_directory_offline(&mut self, offline: bool) {
        self.directory_offline = offline;
    }

    fn directory(&self) -> Result<(), ExternalError> {
        if self.directory_offline {
            Err(ExternalError::Unavailable("directory service offline".into()))
        } else {
            Ok(())
        }
    }
}

impl MetadataProvider for InMemoryCatalog {
    fn metadata_for_entity_type(&self, entity_type: &str) -> Result<Vec<MetadataProperty>, ExternalError> {
        Ok(self.metadata.get(entity_type).cloned().unwrap_or_default())
    }

    fn entity_types(&self) -> Result<Vec<String>, ExternalError> {
        Ok(self.metadata.keys().cloned().collect())
    }
}

impl ConsumerGroupPermissions for InMemoryCatalog {
    fn allowed_templates(&self, consumer_group: &str) -> Result<HashSet<String>, ExternalError> {
        Ok(self.allowed_templates.get(consumer_group).cloned().unwrap_or_default())
    }

    fn default_template(&self, consumer_group: &str) -> Result<Option<String>, ExternalError> {
        Ok(self.default_templates.get(consumer_group).cloned())
    }
}

impl OccurrenceRepository for InMemoryCatalog {
    fn find_occurrences(&self, value: &str) -> Result<Vec<DuplicateResult>, ExternalError> {
        Ok(self.occurrences.get(value).cloned().unwrap_or_default())
    }
}

impl VersionChainProvider for InMemoryCatalog {
    fn version_chain(&self, pid_uri: &str) -> Result<Vec<VersionOverview>, ExternalError> {
        Ok(self
            .version_chains
            .iter()
            .find(|chain| chain.iter().any(|v| v.pid_uri == pid_uri))
            .cloned()
            .unwrap_or_default())
    }
}

impl ReferenceChecker for InMemoryCatalog {
    fn person_exists(&self, email: &str) -> Result<bool, ExternalError> {
        self.directory()?;
        Ok(self.persons.iter().any(|p| p.eq_ignore_ascii_case(email)))
    }

    fn resource_exists(&self, pid_uri: &str) -> Result<bool, ExternalError> {
        self.directory()?;
        Ok(self.resources.contains(pid_uri))
    }
}

impl TaxonomyProvider for InMemoryCatalog {
    fn contains(&self, range: &str, term: &str) -> Result<bool, ExternalError> {
        self.directory()?;
        Ok(self
            .taxonomies
            .get(range)
            .map_or(false, |terms| terms.contains(term)))
    }
}
