//! Resource Pipeline - Single Entry Point
//!
//! Every submission goes through the same steps: type check, rule chain
//! (with the overwrite pass on update), structural validation, duplicate
//! check, content hash. The normalized entity is handed back; nothing is
//! persisted here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::duplicates::DuplicateResolver;
use crate::entity::Entity;
use crate::external::{
    ConsumerGroupPermissions, ExternalError, IdentifierGenerator, MetadataProvider,
    OccurrenceRepository, ReferenceChecker, TaxonomyProvider, TemplateSource,
    VersionChainProvider,
};
use crate::hashing::{compute_report_hash, EntityHasher, HashError};
use crate::identifiers::{DefaultIdentifierGenerator, UnitOfWork};
use crate::memory::InMemoryCatalog;
use crate::rules::{CrudAction, RuleDispatcher, RuleFacade, RuleServices};
use crate::shapes::{ShapeCache, ShapeError};
use crate::structural::StructuralValidator;
use crate::templates::{PidUriTemplate, TemplateError, TemplateRegistry};
use crate::validation::{ResultKind, Severity, ValidationResult, ValidationResultProperty};
use crate::vocab;
use crate::ENGINE_VERSION;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Entity has no type")]
    MissingEntityType,

    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Shape error: {0}")]
    Shapes(#[from] ShapeError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Hash error: {0}")]
    Hash(#[from] HashError),

    #[error("External service error: {0}")]
    External(#[from] ExternalError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// The collaborators a pipeline runs against.
#[derive(Clone)]
pub struct CatalogServices {
    pub metadata: Arc<dyn MetadataProvider>,
    pub templates: Arc<dyn TemplateSource>,
    pub permissions: Arc<dyn ConsumerGroupPermissions>,
    pub occurrences: Arc<dyn OccurrenceRepository>,
    pub versions: Arc<dyn VersionChainProvider>,
    pub generator: Arc<dyn IdentifierGenerator>,
    pub references: Arc<dyn ReferenceChecker>,
    pub taxonomy: Arc<dyn TaxonomyProvider>,
}

impl CatalogServices {
    /// Everything backed by one in-memory catalog, with the default generator.
    pub fn in_memory(catalog: Arc<InMemoryCatalog>, templates: Arc<TemplateRegistry>, number_seed: u64) -> Self {
        Self {
            metadata: catalog.clone(),
            templates,
            permissions: catalog.clone(),
            occurrences: catalog.clone(),
            versions: catalog.clone(),
            generator: Arc::new(DefaultIdentifierGenerator::new(catalog.clone(), number_seed)),
            references: catalog.clone(),
            taxonomy: catalog,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    pub entity: Entity,
    #[serde(default)]
    pub action: CrudAction,
    /// Current draft-or-published version, for updates.
    #[serde(default)]
    pub persisted: Option<Entity>,
    pub consumer_group: String,
    #[serde(default)]
    pub user: Option<String>,
    /// Overrides the configured lenient mode.
    #[serde(default)]
    pub ignore_invalid_properties: Option<bool>,
    #[serde(default)]
    pub previous_version: Option<String>,
}

impl ValidationRequest {
    pub fn create(entity: Entity, consumer_group: impl Into<String>) -> Self {
        Self {
            entity,
            action: CrudAction::Create,
            persisted: None,
            consumer_group: consumer_group.into(),
            user: None,
            ignore_invalid_properties: None,
            previous_version: None,
        }
    }

    pub fn update(entity: Entity, persisted: Entity, consumer_group: impl Into<String>) -> Self {
        Self {
            action: CrudAction::Update,
            persisted: Some(persisted),
            ..Self::create(entity, consumer_group)
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn lenient(mut self, ignore_invalid_properties: bool) -> Self {
        self.ignore_invalid_properties = Some(ignore_invalid_properties);
        self
    }

    /// The version that owns the immutable properties: the persisted one on
    /// update, the submission otherwise.
    fn immutable_source(&self) -> &Entity {
        match (self.action, &self.persisted) {
            (CrudAction::Update, Some(persisted)) => persisted,
            _ => &self.entity,
        }
    }

    fn persisted_id(&self) -> Option<&str> {
        self.persisted
            .as_ref()
            .and_then(|p| p.id.as_deref().or(p.pid_uri()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    pub entity: Entity,
    pub validation: ValidationResult,
    pub conforms: bool,
    pub severity: Option<Severity>,
    /// Content hash; absent when nothing hashable is left.
    pub hash: Option<String>,
    pub report_hash: String,
    pub engine_version: String,
    pub validated_at: DateTime<Utc>,
}

pub struct ResourcePipeline {
    services: CatalogServices,
    config: EngineConfig,
    shapes: Arc<ShapeCache>,
    structural: StructuralValidator,
    dispatcher: RuleDispatcher,
    hasher: EntityHasher,
}

impl ResourcePipeline {
    pub fn new(services: CatalogServices, config: EngineConfig) -> Self {
        Self::with_shape_cache(services, config, Arc::new(ShapeCache::new()))
    }

    /// Shares one shape cache between pipelines.
    pub fn with_shape_cache(services: CatalogServices, config: EngineConfig, shapes: Arc<ShapeCache>) -> Self {
        let structural = StructuralValidator::new(shapes.clone(), services.metadata.clone());
        let dispatcher = RuleDispatcher::new().with_immutable_keys(config.immutable_keys.clone());
        let hasher = EntityHasher::new().with_ignored(config.hash_ignored_keys.iter().cloned());
        Self {
            services,
            config,
            shapes,
            structural,
            dispatcher,
            hasher,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn shape_cache(&self) -> &Arc<ShapeCache> {
        &self.shapes
    }

    /// Drops the shape graph; the next validation rebuilds it from current metadata.
    pub fn invalidate_shapes(&self) {
        self.shapes.invalidate();
    }

    pub fn list_templates(&self) -> Vec<PidUriTemplate> {
        self.services.templates.all_templates()
    }

    pub fn match_template(&self, template_id: &str, identifier: &str) -> Result<bool, PipelineError> {
        let template = self
            .services
            .templates
            .template_by_id(template_id)
            .ok_or_else(|| PipelineError::TemplateNotFound(template_id.to_string()))?;
        Ok(template.matches(identifier)?)
    }

    pub fn hash(&self, entity: &Entity) -> Result<String, PipelineError> {
        Ok(self.hasher.hash(entity, &[])?)
    }

    /// Validates one submission in its own unit of work.
    pub fn validate(&self, request: &ValidationRequest) -> Result<PipelineOutcome, PipelineError> {
        let mut uow = UnitOfWork::new();
        self.validate_in(request, &mut uow)
    }

    /// Validates submissions that will be persisted together. Generated
    /// identifiers never collide within the batch, and submissions sharing
    /// a PID URI are all flagged.
    pub fn validate_batch(&self, requests: &[ValidationRequest]) -> Result<Vec<PipelineOutcome>, PipelineError> {
        let mut uow = UnitOfWork::new();
        let mut outcomes = requests
            .iter()
            .map(|request| self.validate_in(request, &mut uow))
            .collect::<Result<Vec<_>, _>>()?;

        let mut by_pid: HashMap<String, usize> = HashMap::new();
        for outcome in &outcomes {
            if let Some(pid) = outcome.entity.pid_uri() {
                *by_pid.entry(pid.to_string()).or_insert(0) += 1;
            }
        }

        for outcome in &mut outcomes {
            let Some(pid) = outcome.entity.pid_uri().map(str::to_string) else {
                continue;
            };
            if by_pid.get(&pid).copied().unwrap_or(0) > 1 {
                outcome.validation.results.push(
                    ValidationResultProperty::new(
                        pid.clone(),
                        vocab::HAS_PID,
                        format!("The identifier {} is used by more than one resource in this batch", pid),
                        Severity::Violation,
                        ResultKind::Duplicate,
                    )
                    .with_value(pid)
                    .with_constraint("duplicate:batch"),
                );
                outcome.conforms = outcome.validation.conforms();
                outcome.severity = outcome.validation.severity();
                outcome.report_hash = compute_report_hash(&outcome.validation)?;
            }
        }

        Ok(outcomes)
    }

    fn validate_in(&self, request: &ValidationRequest, uow: &mut UnitOfWork) -> Result<PipelineOutcome, PipelineError> {
        let entity_type = request
            .immutable_source()
            .entity_type()
            .ok_or(PipelineError::MissingEntityType)?
            .to_string();
        let metadata = self.services.metadata.metadata_for_entity_type(&entity_type)?;
        if metadata.is_empty() {
            return Err(PipelineError::UnknownEntityType(entity_type));
        }

        let mut entity = request.entity.clone();
        let mut facade = RuleFacade::new(request.action, &request.consumer_group)
            .with_persisted(request.persisted.as_ref())
            .with_user(request.user.as_deref());
        facade.resource_pid = request.immutable_source().pid_uri().map(str::to_string);

        let rule_services = RuleServices {
            templates: self.services.templates.as_ref(),
            permissions: self.services.permissions.as_ref(),
            generator: self.services.generator.as_ref(),
            references: self.services.references.as_ref(),
            taxonomy: self.services.taxonomy.as_ref(),
        };
        let mut results = self
            .dispatcher
            .validate(&mut entity, &metadata, &facade, &rule_services, uow);

        let lenient = request
            .ignore_invalid_properties
            .unwrap_or(self.config.ignore_invalid_properties);
        let structural = self.structural.validate(&mut entity, &metadata, lenient)?;
        results.extend(structural.results);

        let resolver = DuplicateResolver::new(
            self.services.occurrences.as_ref(),
            self.services.versions.as_ref(),
        );
        let previous_version = request
            .previous_version
            .as_deref()
            .or_else(|| entity.first_str(vocab::HAS_PREVIOUS_VERSION));
        results.extend(resolver.check_duplicates(&entity, request.persisted_id(), previous_version));

        let hash = match self.hasher.hash(&entity, &[]) {
            Ok(hash) => Some(hash),
            Err(HashError::MissingProperties) => None,
            Err(e) => return Err(e.into()),
        };

        let validation = ValidationResult::new(results, structural.triples);
        let report_hash = compute_report_hash(&validation)?;
        tracing::info!(
            entity_type = %entity_type,
            conforms = validation.conforms(),
            violations = validation.count(Severity::Violation),
            warnings = validation.count(Severity::Warning),
            "validated resource"
        );

        Ok(PipelineOutcome {
            conforms: validation.conforms(),
            severity: validation.severity(),
            entity,
            validation,
            hash,
            report_hash,
            engine_version: ENGINE_VERSION.to_string(),
            validated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Value;
    use crate::metadata::MetadataProperty;

    fn pipeline(catalog: InMemoryCatalog) -> ResourcePipeline {
        let services = CatalogServices::in_memory(Arc::new(catalog), Arc::new(TemplateRegistry::new()), 0);
        ResourcePipeline::new(services, EngineConfig::default())
    }

    fn catalog() -> InMemoryCatalog {
        let mut label = MetadataProperty::new("urn:label");
        label.min_count = Some(1);
        label.datatype = Some(vocab::XSD_STRING.into());
        let mut catalog = InMemoryCatalog::new();
        catalog.add_metadata("urn:Dataset", vec![label]);
        catalog
    }

    #[test]
    fn test_missing_type_is_rejected() {
        let err = pipeline(catalog())
            .validate(&ValidationRequest::create(Entity::new(), "g"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingEntityType));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let entity = Entity::new().with_type("urn:Unknown");
        let err = pipeline(catalog())
            .validate(&ValidationRequest::create(entity, "g"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownEntityType(t) if t == "urn:Unknown"));
    }

    #[test]
    fn test_conforming_entity_is_normalized_and_hashed() {
        let entity = Entity::new()
            .with_type("urn:Dataset")
            .with("urn:label", Value::literal("  Sales  "));
        let outcome = pipeline(catalog())
            .validate(&ValidationRequest::create(entity, "g"))
            .unwrap();

        assert!(outcome.conforms, "{:?}", outcome.validation.results);
        assert_eq!(outcome.entity.values("urn:label"), &[Value::literal("Sales")]);
        assert_eq!(outcome.hash.as_ref().map(String::len), Some(64));
        assert_eq!(outcome.engine_version, ENGINE_VERSION);
    }

    #[test]
    fn test_update_is_typed_by_persisted_version() {
        let persisted = Entity::with_id("urn:r")
            .with_type("urn:Dataset")
            .with("urn:label", Value::literal("Sales"));
        let submitted = Entity::with_id("urn:r")
            .with_type("urn:Bogus")
            .with("urn:label", Value::literal("Sales 2024"));
        let outcome = pipeline(catalog())
            .validate(&ValidationRequest::update(submitted, persisted, "g"))
            .unwrap();

        assert!(outcome.conforms, "{:?}", outcome.validation.results);
        assert_eq!(outcome.entity.entity_type(), Some("urn:Dataset"));
        assert_eq!(outcome.entity.values("urn:label"), &[Value::literal("Sales 2024")]);
    }

    #[test]
    fn test_update_drops_client_author_absent_from_persisted() {
        let persisted = Entity::with_id("urn:r")
            .with_type("urn:Dataset")
            .with("urn:label", Value::literal("Sales"));
        let submitted = persisted
            .clone()
            .with(vocab::AUTHOR, Value::literal("intruder@example.com"));
        let outcome = pipeline(catalog())
            .validate(&ValidationRequest::update(submitted, persisted, "g"))
            .unwrap();

        assert!(outcome.entity.values(vocab::AUTHOR).is_empty());
    }

    #[test]
    fn test_update_self_link_uses_persisted_pid() {
        let own = "https://pid.example.com/N/1";
        let mut label = MetadataProperty::new("urn:label");
        label.datatype = Some(vocab::XSD_STRING.into());
        let mut link = MetadataProperty::new("urn:isDerivedFrom");
        link.group = Some(vocab::GROUP_LINK_TYPES.into());
        let mut catalog = InMemoryCatalog::new();
        catalog.add_metadata("urn:Dataset", vec![label, link]);
        catalog.add_resource(own);

        let pid = |uri: &str| Value::Nested(Entity::with_id(uri).with_type(vocab::PERMANENT_IDENTIFIER));
        let persisted = Entity::with_id(own)
            .with_type("urn:Dataset")
            .with("urn:label", Value::literal("Sales"))
            .with(vocab::HAS_PID, pid(own));
        let submitted = Entity::with_id(own)
            .with_type("urn:Dataset")
            .with("urn:label", Value::literal("Sales"))
            .with(vocab::HAS_PID, pid("https://pid.example.com/N/2"))
            .with("urn:isDerivedFrom", Value::reference(own));
        let outcome = pipeline(catalog)
            .validate(&ValidationRequest::update(submitted, persisted, "g"))
            .unwrap();

        assert!(!outcome.conforms);
        assert!(outcome
            .validation
            .results
            .iter()
            .any(|r| r.path == "urn:isDerivedFrom" && r.message.contains("cannot link to itself")));
    }

    #[test]
    fn test_match_template_unknown_id() {
        let err = pipeline(catalog()).match_template("missing", "urn:x").unwrap_err();
        assert!(matches!(err, PipelineError::TemplateNotFound(_)));
    }
}
