//! Identifier Engine - Selecting and Generating PID URIs
//!
//! Client-supplied identifiers are matched against the known templates;
//! template-only submissions are handed to an external generator. Every
//! attachment of a template is gated by the consumer group's allow-list.

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::entity::Entity;
use crate::external::{
    ConsumerGroupPermissions, ExternalError, IdentifierGenerator, OccurrenceRepository,
    TemplateSource,
};
use crate::templates::{IdType, PidUriTemplate, TemplateError, TemplateId};

const MAX_GENERATION_ATTEMPTS: u64 = 10_000;

#[derive(Debug, Error)]
pub enum IdentifierError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Unknown identifier template: {0}")]
    UnknownTemplate(String),

    #[error("Template {template} is not permitted for consumer group {group}")]
    Forbidden { template: String, group: String },

    #[error("Identifier {identifier} does not match template {template}")]
    Mismatch { identifier: String, template: String },

    #[error("Generated identifier {identifier} is not valid for template {template}")]
    MalformedGenerated { identifier: String, template: String },

    #[error("Template {0} is deprecated and cannot generate identifiers")]
    Deprecated(String),

    #[error("Identifier {0} was already generated in this unit of work")]
    AlreadyGenerated(String),

    #[error("No identifier or template given and consumer group {0} has no default template")]
    NoTemplate(String),

    #[error(transparent)]
    External(#[from] ExternalError),
}

impl IdentifierError {
    /// Configuration problems as opposed to client or lookup problems.
    pub fn is_configuration(&self) -> bool {
        matches!(self, IdentifierError::Template(_) | IdentifierError::UnknownTemplate(_))
    }
}

/// Per-request (or per-batch) state. Never shared across requests.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    generated: HashSet<String>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_taken(&self, identifier: &str) -> bool {
        self.generated.contains(identifier)
    }

    /// Records a generated identifier. Returns false if it was already present.
    pub fn record(&mut self, identifier: &str) -> bool {
        self.generated.insert(identifier.to_string())
    }

    pub fn generated(&self) -> &HashSet<String> {
        &self.generated
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub identifier: String,
    pub template: Option<TemplateId>,
    pub generated: bool,
}

pub struct IdentifierEngine<'a> {
    templates: &'a dyn TemplateSource,
    permissions: &'a dyn ConsumerGroupPermissions,
    generator: &'a dyn IdentifierGenerator,
}

impl<'a> IdentifierEngine<'a> {
    pub fn new(
        templates: &'a dyn TemplateSource,
        permissions: &'a dyn ConsumerGroupPermissions,
        generator: &'a dyn IdentifierGenerator,
    ) -> Self {
        Self { templates, permissions, generator }
    }

    /// First template (in source order) whose regex matches `identifier`.
    pub fn find_matching_template(
        &self,
        identifier: &str,
    ) -> Result<Option<PidUriTemplate>, TemplateError> {
        for template in self.templates.all_templates() {
            if template.matches(identifier)? {
                return Ok(Some(template));
            }
        }
        Ok(None)
    }

    pub fn select_or_generate(
        &self,
        entity: &Entity,
        identifier: Option<&str>,
        template_id: Option<&str>,
        consumer_group: &str,
        uow: &mut UnitOfWork,
    ) -> Result<Selection, IdentifierError> {
        match (identifier, template_id) {
            (Some(identifier), None) => {
                let template = match self.find_matching_template(identifier)? {
                    Some(template) => template,
                    None => {
                        return Ok(Selection {
                            identifier: identifier.to_string(),
                            template: None,
                            generated: false,
                        })
                    }
                };
                self.ensure_permitted(&template.id, consumer_group)?;
                Ok(Selection {
                    identifier: identifier.to_string(),
                    template: Some(template.id),
                    generated: false,
                })
            }
            (Some(identifier), Some(template_id)) => {
                let template = self.lookup(template_id)?;
                if !template.matches(identifier)? {
                    return Err(IdentifierError::Mismatch {
                        identifier: identifier.to_string(),
                        template: template.id,
                    });
                }
                self.ensure_permitted(&template.id, consumer_group)?;
                Ok(Selection {
                    identifier: identifier.to_string(),
                    template: Some(template.id),
                    generated: false,
                })
            }
            (None, Some(template_id)) => self.generate(entity, template_id, consumer_group, uow),
            (None, None) => match self.permissions.default_template(consumer_group)? {
                Some(template_id) => self.generate(entity, &template_id, consumer_group, uow),
                None => Err(IdentifierError::NoTemplate(consumer_group.to_string())),
            },
        }
    }

    fn generate(
        &self,
        entity: &Entity,
        template_id: &str,
        consumer_group: &str,
        uow: &mut UnitOfWork,
    ) -> Result<Selection, IdentifierError> {
        let template = self.lookup(template_id)?;
        if template.deprecated {
            return Err(IdentifierError::Deprecated(template.id));
        }
        self.ensure_permitted(&template.id, consumer_group)?;

        let identifier = self.generator.generate(&template, entity, uow.generated())?;
        if !template.matches(&identifier)? {
            return Err(IdentifierError::MalformedGenerated {
                identifier,
                template: template.id,
            });
        }
        if !uow.record(&identifier) {
            return Err(IdentifierError::AlreadyGenerated(identifier));
        }

        tracing::debug!(%identifier, template = %template.id, "generated identifier");
        Ok(Selection {
            identifier,
            template: Some(template.id),
            generated: true,
        })
    }

    fn lookup(&self, template_id: &str) -> Result<PidUriTemplate, IdentifierError> {
        self.templates
            .template_by_id(template_id)
            .ok_or_else(|| IdentifierError::UnknownTemplate(template_id.to_string()))
    }

    fn ensure_permitted(&self, template_id: &str, consumer_group: &str) -> Result<(), IdentifierError> {
        let allowed = self.permissions.allowed_templates(consumer_group)?;
        if allowed.contains(template_id) {
            Ok(())
        } else {
            Err(IdentifierError::Forbidden {
                template: template_id.to_string(),
                group: consumer_group.to_string(),
            })
        }
    }
}

/// Default generator: random GUIDs, or the next free number above the seed.
/// Candidates already present in the corpus or in the unit of work are skipped.
pub struct DefaultIdentifierGenerator {
    occurrences: Arc<dyn OccurrenceRepository>,
    number_seed: u64,
}

impl DefaultIdentifierGenerator {
    pub fn new(occurrences: Arc<dyn OccurrenceRepository>, number_seed: u64) -> Self {
        Self { occurrences, number_seed }
    }

    fn is_free(&self, candidate: &str, taken: &HashSet<String>) -> Result<bool, ExternalError> {
        if taken.contains(candidate) {
            return Ok(false);
        }
        Ok(self.occurrences.find_occurrences(candidate)?.is_empty())
    }
}

impl IdentifierGenerator for DefaultIdentifierGenerator {
    fn generate(
        &self,
        template: &PidUriTemplate,
        _entity: &Entity,
        taken: &HashSet<String>,
    ) -> Result<String, ExternalError> {
        let id_type = template
            .id_type()
            .map_err(|e| ExternalError::Lookup(e.to_string()))?;

        match id_type {
            IdType::Guid => {
                for _ in 0..MAX_GENERATION_ATTEMPTS {
                    let candidate = template.render(&Uuid::new_v4().to_string());
                    if self.is_free(&candidate, taken)? {
                        return Ok(candidate);
                    }
                }
            }
            IdType::Number => {
                let highest_taken = taken
                    .iter()
                    .filter_map(|id| template.number_of(id))
                    .max()
                    .unwrap_or(0);
                let exhausted =
                    || ExternalError::Lookup(format!("number space of template {} is exhausted", template.id));
                let mut next = self.number_seed.max(highest_taken).checked_add(1).ok_or_else(exhausted)?;
                for _ in 0..MAX_GENERATION_ATTEMPTS {
                    let candidate = template.render(&next.to_string());
                    if self.is_free(&candidate, taken)? {
                        return Ok(candidate);
                    }
                    next = next.checked_add(1).ok_or_else(exhausted)?;
                }
            }
        }

        Err(ExternalError::Lookup(format!(
            "no free identifier found for template {}",
            template.id
        )))
    }
}
