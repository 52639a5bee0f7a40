//! External Collaborators
//!
//! The engine never talks to storage or directories itself. Everything it
//! needs from the outside world comes through these traits.

use std::collections::HashSet;
use thiserror::Error;

use crate::duplicates::{DuplicateResult, VersionOverview};
use crate::entity::Entity;
use crate::metadata::MetadataProperty;
use crate::templates::PidUriTemplate;

#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Lookup failed: {0}")]
    Lookup(String),
}

pub trait MetadataProvider: Send + Sync {
    /// Ordered property constraints for one entity type. Empty when the type is unknown.
    fn metadata_for_entity_type(&self, entity_type: &str) -> Result<Vec<MetadataProperty>, ExternalError>;

    /// Every entity type the provider knows; used to build the shape graph.
    fn entity_types(&self) -> Result<Vec<String>, ExternalError>;
}

pub trait TemplateSource: Send + Sync {
    fn all_templates(&self) -> Vec<PidUriTemplate>;

    fn template_by_id(&self, id: &str) -> Option<PidUriTemplate>;
}

pub trait ConsumerGroupPermissions: Send + Sync {
    fn allowed_templates(&self, consumer_group: &str) -> Result<HashSet<String>, ExternalError>;

    fn default_template(&self, consumer_group: &str) -> Result<Option<String>, ExternalError>;
}

pub trait OccurrenceRepository: Send + Sync {
    /// Every draft and published occurrence of the literal `value`.
    fn find_occurrences(&self, value: &str) -> Result<Vec<DuplicateResult>, ExternalError>;
}

pub trait VersionChainProvider: Send + Sync {
    fn version_chain(&self, pid_uri: &str) -> Result<Vec<VersionOverview>, ExternalError>;
}

pub trait IdentifierGenerator: Send + Sync {
    /// Synthesizes a fresh identifier for `template`. `taken` holds identifiers
    /// already handed out in the current unit of work.
    fn generate(
        &self,
        template: &PidUriTemplate,
        entity: &Entity,
        taken: &HashSet<String>,
    ) -> Result<String, ExternalError>;
}

pub trait ReferenceChecker: Send + Sync {
    fn person_exists(&self, email: &str) -> Result<bool, ExternalError>;

    fn resource_exists(&self, pid_uri: &str) -> Result<bool, ExternalError>;
}

pub trait TaxonomyProvider: Send + Sync {
    /// Whether `term` belongs to the controlled vocabulary rooted at `range`.
    fn contains(&self, range: &str, term: &str) -> Result<bool, ExternalError>;
}
