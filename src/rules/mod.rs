//! Validator Chain - Per-Property Rules
//!
//! Rules are registered at compile time as records carrying a priority and
//! match criteria. A record applies to a property when any one of its
//! non-empty criteria matches the property's metadata; several records may
//! apply to the same property. Applicable rules run in ascending priority,
//! each seeing the values left by the previous one.

mod checks;

pub use checks::{
    DateTimeRule, IdentifierRule, LastChangeUserRule, LifecycleDatesRule, LinkTypeRule,
    PersonRule, TaxonomyRule, UrlRule, WhitespaceRule,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, Value};
use crate::external::{
    ConsumerGroupPermissions, IdentifierGenerator, ReferenceChecker, TaxonomyProvider,
    TemplateSource,
};
use crate::identifiers::UnitOfWork;
use crate::metadata::MetadataProperty;
use crate::validation::{ResultKind, Severity, ValidationResultProperty};
use crate::vocab;

/// Properties the persisted version keeps on update, whatever the client sent.
pub const DEFAULT_IMMUTABLE_KEYS: &[&str] = &[
    vocab::RDF_TYPE,
    vocab::HAS_PID,
    vocab::HAS_BASE_URI,
    vocab::DATE_CREATED,
    vocab::AUTHOR,
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrudAction {
    #[default]
    Create,
    Update,
}

/// What the rules may consult besides the entity itself.
pub struct RuleServices<'a> {
    pub templates: &'a dyn TemplateSource,
    pub permissions: &'a dyn ConsumerGroupPermissions,
    pub generator: &'a dyn IdentifierGenerator,
    pub references: &'a dyn ReferenceChecker,
    pub taxonomy: &'a dyn TaxonomyProvider,
}

/// Request-level facts shared by every rule invocation.
pub struct RuleFacade<'a> {
    pub action: CrudAction,
    pub persisted: Option<&'a Entity>,
    pub consumer_group: &'a str,
    pub user: Option<&'a str>,
    pub now: DateTime<Utc>,
    /// PID URI of the resource being validated, as submitted.
    pub resource_pid: Option<String>,
}

impl<'a> RuleFacade<'a> {
    pub fn new(action: CrudAction, consumer_group: &'a str) -> Self {
        Self {
            action,
            persisted: None,
            consumer_group,
            user: None,
            now: Utc::now(),
            resource_pid: None,
        }
    }

    pub fn with_persisted(mut self, persisted: Option<&'a Entity>) -> Self {
        self.persisted = persisted;
        self
    }

    pub fn with_user(mut self, user: Option<&'a str>) -> Self {
        self.user = user;
        self
    }
}

/// One property as a rule sees it.
pub struct RuleInput<'e> {
    pub key: &'e str,
    pub property: &'e MetadataProperty,
    pub values: &'e [Value],
    pub entity: &'e Entity,
    /// Top-level entity rather than a nested sub-entity.
    pub is_root: bool,
}

impl RuleInput<'_> {
    pub fn node(&self) -> String {
        self.entity
            .pid_uri()
            .or(self.entity.id.as_deref())
            .unwrap_or_default()
            .to_string()
    }

    /// A finding on this property, tagged with the rule that produced it.
    pub fn result(&self, rule: &str, message: impl Into<String>, severity: Severity) -> ValidationResultProperty {
        ValidationResultProperty::new(self.node(), self.key, message, severity, ResultKind::Custom)
            .with_constraint(format!("rule:{}", rule))
    }
}

/// What a rule hands back: an optional replacement value list plus findings.
#[derive(Debug, Default)]
pub struct RuleOutcome {
    pub patch: Option<Vec<Value>>,
    pub results: Vec<ValidationResultProperty>,
}

impl RuleOutcome {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn patched(values: Vec<Value>) -> Self {
        Self {
            patch: Some(values),
            results: vec![],
        }
    }

    pub fn with_result(mut self, result: ValidationResultProperty) -> Self {
        self.results.push(result);
        self
    }
}

pub struct RuleContext<'c, 'a> {
    pub facade: &'c RuleFacade<'a>,
    pub services: &'c RuleServices<'a>,
    pub uow: &'c mut UnitOfWork,
}

pub trait PropertyRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, input: &RuleInput<'_>, ctx: &mut RuleContext<'_, '_>) -> RuleOutcome;
}

/// Match criteria. Empty lists and `taxonomy: false` never match.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchCriteria {
    pub keys: &'static [&'static str],
    pub datatypes: &'static [&'static str],
    pub ranges: &'static [&'static str],
    pub groups: &'static [&'static str],
    pub field_types: &'static [&'static str],
    pub taxonomy: bool,
}

impl MatchCriteria {
    pub const NONE: MatchCriteria = MatchCriteria {
        keys: &[],
        datatypes: &[],
        ranges: &[],
        groups: &[],
        field_types: &[],
        taxonomy: false,
    };

    pub fn matches(&self, property: &MetadataProperty) -> bool {
        let within = |list: &[&str], value: Option<&String>| {
            value.map_or(false, |v| list.contains(&v.as_str()))
        };

        self.keys.contains(&property.key.as_str())
            || within(self.datatypes, property.datatype.as_ref())
            || within(self.ranges, property.range.as_ref())
            || within(self.groups, property.group.as_ref())
            || within(self.field_types, property.field_type.as_ref())
            || (self.taxonomy && property.is_taxonomy)
    }
}

#[derive(Clone, Copy)]
pub struct ValidatorRecord {
    pub name: &'static str,
    pub priority: u32,
    pub criteria: MatchCriteria,
    pub rule: &'static dyn PropertyRule,
}

impl std::fmt::Debug for ValidatorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorRecord")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

/// The built-in chain.
pub fn default_registry() -> Vec<ValidatorRecord> {
    vec![
        ValidatorRecord {
            name: "whitespace",
            priority: 10,
            criteria: MatchCriteria { datatypes: &[vocab::XSD_STRING], ..MatchCriteria::NONE },
            rule: &WhitespaceRule,
        },
        ValidatorRecord {
            name: "datetime",
            priority: 20,
            criteria: MatchCriteria { datatypes: &[vocab::XSD_DATE_TIME], ..MatchCriteria::NONE },
            rule: &DateTimeRule,
        },
        ValidatorRecord {
            name: "lifecycle-dates",
            priority: 30,
            criteria: MatchCriteria {
                keys: &[vocab::DATE_CREATED, vocab::DATE_MODIFIED],
                ..MatchCriteria::NONE
            },
            rule: &LifecycleDatesRule,
        },
        ValidatorRecord {
            name: "last-change-user",
            priority: 35,
            criteria: MatchCriteria { keys: &[vocab::LAST_CHANGE_USER], ..MatchCriteria::NONE },
            rule: &LastChangeUserRule,
        },
        ValidatorRecord {
            name: "url",
            priority: 40,
            criteria: MatchCriteria { datatypes: &[vocab::XSD_ANY_URI], ..MatchCriteria::NONE },
            rule: &UrlRule,
        },
        ValidatorRecord {
            name: "person",
            priority: 50,
            criteria: MatchCriteria {
                keys: &[vocab::AUTHOR],
                field_types: &[vocab::FIELD_TYPE_PERSON],
                ..MatchCriteria::NONE
            },
            rule: &PersonRule,
        },
        ValidatorRecord {
            name: "taxonomy",
            priority: 60,
            criteria: MatchCriteria { taxonomy: true, ..MatchCriteria::NONE },
            rule: &TaxonomyRule,
        },
        ValidatorRecord {
            name: "link-type",
            priority: 70,
            criteria: MatchCriteria { groups: &[vocab::GROUP_LINK_TYPES], ..MatchCriteria::NONE },
            rule: &LinkTypeRule,
        },
        ValidatorRecord {
            name: "identifier",
            priority: 80,
            criteria: MatchCriteria {
                keys: &[vocab::HAS_PID, vocab::HAS_BASE_URI],
                ..MatchCriteria::NONE
            },
            rule: &IdentifierRule,
        },
    ]
}

pub struct RuleDispatcher {
    records: Vec<ValidatorRecord>,
    immutable_keys: Vec<String>,
}

impl RuleDispatcher {
    pub fn new() -> Self {
        Self::with_records(default_registry())
    }

    /// Records are ordered by priority; ties keep registration order.
    pub fn with_records(mut records: Vec<ValidatorRecord>) -> Self {
        records.sort_by_key(|r| r.priority);
        Self {
            records,
            immutable_keys: DEFAULT_IMMUTABLE_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn with_immutable_keys(mut self, keys: Vec<String>) -> Self {
        self.immutable_keys = keys;
        self
    }

    pub fn records(&self) -> &[ValidatorRecord] {
        &self.records
    }

    pub fn applicable<'r>(&'r self, property: &'r MetadataProperty) -> impl Iterator<Item = &'r ValidatorRecord> + 'r {
        self.records.iter().filter(move |r| r.criteria.matches(property))
    }

    /// Runs every applicable rule for one property, applying patches in order.
    pub fn validate_property(
        &self,
        property: &MetadataProperty,
        entity: &mut Entity,
        is_root: bool,
        ctx: &mut RuleContext<'_, '_>,
    ) -> Vec<ValidationResultProperty> {
        let mut results = Vec::new();

        for record in self.applicable(property) {
            let outcome = {
                let input = RuleInput {
                    key: &property.key,
                    property,
                    values: entity.values(&property.key),
                    entity: &*entity,
                    is_root,
                };
                record.rule.apply(&input, ctx)
            };
            tracing::debug!(
                rule = record.name,
                key = %property.key,
                patched = outcome.patch.is_some(),
                findings = outcome.results.len(),
                "rule applied"
            );

            if let Some(patch) = outcome.patch {
                if patch.is_empty() {
                    entity.remove(&property.key);
                } else {
                    entity.set(&property.key, patch);
                }
            }
            results.extend(outcome.results);
        }

        results
    }

    /// Dispatches every metadata property of `entity`, then recurses into
    /// nested entities whose type has nested metadata. On update, finishes
    /// with the overwrite pass.
    pub fn validate(
        &self,
        entity: &mut Entity,
        metadata: &[MetadataProperty],
        facade: &RuleFacade<'_>,
        services: &RuleServices<'_>,
        uow: &mut UnitOfWork,
    ) -> Vec<ValidationResultProperty> {
        let mut ctx = RuleContext { facade, services, uow };
        let results = self.validate_level(entity, metadata, true, &mut ctx);

        if let (CrudAction::Update, Some(persisted)) = (facade.action, facade.persisted) {
            self.overwrite_immutable(entity, persisted);
        }

        results
    }

    fn validate_level(
        &self,
        entity: &mut Entity,
        metadata: &[MetadataProperty],
        is_root: bool,
        ctx: &mut RuleContext<'_, '_>,
    ) -> Vec<ValidationResultProperty> {
        let mut results = Vec::new();

        for property in metadata {
            results.extend(self.validate_property(property, entity, is_root, ctx));
        }

        for property in metadata.iter().filter(|p| !p.nested.is_empty()) {
            let Some(values) = entity.properties.get_mut(&property.key) else {
                continue;
            };
            for nested in values.iter_mut().filter_map(Value::as_entity_mut) {
                let nested_metadata = nested
                    .entity_type()
                    .and_then(|t| property.nested_for(t));
                if let Some(nested_metadata) = nested_metadata {
                    results.extend(self.validate_level(nested, nested_metadata, false, ctx));
                }
            }
        }

        results
    }

    /// Replaces immutable properties with exactly the persisted version's
    /// values. Keys the persisted version does not hold are dropped.
    pub fn overwrite_immutable(&self, entity: &mut Entity, persisted: &Entity) {
        for key in &self.immutable_keys {
            let kept = persisted.values(key);
            if kept.is_empty() {
                entity.remove(key);
            } else {
                entity.set(key, kept.to_vec());
            }
        }
    }
}

impl Default for RuleDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::identifiers::DefaultIdentifierGenerator;
    use crate::memory::InMemoryCatalog;
    use crate::templates::TemplateRegistry;
    use std::sync::Arc;

    pub(crate) struct Fixture {
        pub catalog: Arc<InMemoryCatalog>,
        pub templates: TemplateRegistry,
        pub generator: DefaultIdentifierGenerator,
    }

    impl Fixture {
        pub fn new(catalog: InMemoryCatalog) -> Self {
            let catalog = Arc::new(catalog);
            Self {
                generator: DefaultIdentifierGenerator::new(catalog.clone(), 0),
                catalog,
                templates: TemplateRegistry::new(),
            }
        }

        pub fn services(&self) -> RuleServices<'_> {
            RuleServices {
                templates: &self.templates,
                permissions: self.catalog.as_ref(),
                generator: &self.generator,
                references: self.catalog.as_ref(),
                taxonomy: self.catalog.as_ref(),
            }
        }
    }

    fn string_property(key: &str) -> MetadataProperty {
        let mut prop = MetadataProperty::new(key);
        prop.datatype = Some(vocab::XSD_STRING.to_string());
        prop
    }

    static TRIM_BY_RANGE: MatchCriteria = MatchCriteria {
        ranges: &["urn:Keyword"],
        ..MatchCriteria::NONE
    };

    #[test]
    fn test_any_criterion_matches() {
        let criteria = MatchCriteria {
            keys: &["urn:a"],
            groups: &["G"],
            ..MatchCriteria::NONE
        };
        let mut by_group = MetadataProperty::new("urn:other");
        by_group.group = Some("G".into());
        assert!(criteria.matches(&MetadataProperty::new("urn:a")));
        assert!(criteria.matches(&by_group));
        assert!(!criteria.matches(&MetadataProperty::new("urn:b")));
    }

    #[test]
    fn test_record_without_criteria_matches_nothing() {
        let mut prop = MetadataProperty::new("urn:a");
        prop.is_taxonomy = false;
        prop.datatype = Some(vocab::XSD_STRING.into());
        assert!(!MatchCriteria::NONE.matches(&prop));
    }

    #[test]
    fn test_range_record_fires_for_every_key_with_that_range() {
        let dispatcher = RuleDispatcher::with_records(vec![ValidatorRecord {
            name: "trim-keywords",
            priority: 1,
            criteria: TRIM_BY_RANGE,
            rule: &WhitespaceRule,
        }]);
        let mut first = MetadataProperty::new("urn:first");
        first.range = Some("urn:Keyword".into());
        let mut second = MetadataProperty::new("urn:second");
        second.range = Some("urn:Keyword".into());
        let unrelated = MetadataProperty::new("urn:third");
        let metadata = vec![first, second, unrelated];

        let mut entity = Entity::new()
            .with("urn:first", Value::literal("  a "))
            .with("urn:second", Value::literal(" b"))
            .with("urn:third", Value::literal(" c "));

        let fixture = Fixture::new(InMemoryCatalog::new());
        let services = fixture.services();
        let facade = RuleFacade::new(CrudAction::Create, "group");
        let mut uow = UnitOfWork::new();
        let results = dispatcher.validate(&mut entity, &metadata, &facade, &services, &mut uow);

        assert!(results.is_empty());
        assert_eq!(entity.values("urn:first"), &[Value::literal("a")]);
        assert_eq!(entity.values("urn:second"), &[Value::literal("b")]);
        assert_eq!(entity.values("urn:third"), &[Value::literal(" c ")]);
    }

    #[test]
    fn test_priority_order_is_stable() {
        let records = vec![
            ValidatorRecord { name: "late", priority: 5, criteria: MatchCriteria::NONE, rule: &UrlRule },
            ValidatorRecord { name: "first-tie", priority: 1, criteria: MatchCriteria::NONE, rule: &UrlRule },
            ValidatorRecord { name: "second-tie", priority: 1, criteria: MatchCriteria::NONE, rule: &UrlRule },
        ];
        let dispatcher = RuleDispatcher::with_records(records);
        let names: Vec<_> = dispatcher.records().iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["first-tie", "second-tie", "late"]);
    }

    #[test]
    fn test_default_registry_is_sorted() {
        let dispatcher = RuleDispatcher::new();
        let priorities: Vec<_> = dispatcher.records().iter().map(|r| r.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        assert_eq!(priorities, sorted);
    }

    #[test]
    fn test_absent_property_is_still_dispatched() {
        let mut created = MetadataProperty::new(vocab::DATE_CREATED);
        created.datatype = Some(vocab::XSD_DATE_TIME.into());
        let metadata = vec![created];
        let mut entity = Entity::new();

        let fixture = Fixture::new(InMemoryCatalog::new());
        let services = fixture.services();
        let facade = RuleFacade::new(CrudAction::Create, "group");
        let mut uow = UnitOfWork::new();
        RuleDispatcher::new().validate(&mut entity, &metadata, &facade, &services, &mut uow);

        assert_eq!(entity.values(vocab::DATE_CREATED).len(), 1);
    }

    #[test]
    fn test_later_rule_sees_earlier_patch() {
        let issued = MetadataProperty::new("urn:issued");
        let dispatcher = RuleDispatcher::with_records(vec![
            ValidatorRecord {
                name: "datetime",
                priority: 20,
                criteria: MatchCriteria { keys: &["urn:issued"], ..MatchCriteria::NONE },
                rule: &DateTimeRule,
            },
            ValidatorRecord {
                name: "whitespace",
                priority: 10,
                criteria: MatchCriteria { keys: &["urn:issued"], ..MatchCriteria::NONE },
                rule: &WhitespaceRule,
            },
        ]);
        let mut entity = Entity::new().with("urn:issued", Value::literal("  2024-01-01  "));

        let fixture = Fixture::new(InMemoryCatalog::new());
        let services = fixture.services();
        let facade = RuleFacade::new(CrudAction::Create, "group");
        let mut uow = UnitOfWork::new();
        let results = dispatcher.validate(&mut entity, &[issued], &facade, &services, &mut uow);

        assert!(results.is_empty());
        assert_eq!(entity.values("urn:issued"), &[Value::literal("2024-01-01T00:00:00Z")]);
    }

    #[test]
    fn test_nested_entities_are_dispatched() {
        let mut distribution = MetadataProperty::new(vocab::DISTRIBUTION);
        distribution.nested = vec![crate::metadata::NestedMetadata {
            entity_type: "urn:Endpoint".into(),
            properties: vec![string_property("urn:label")],
        }];
        let endpoint = Entity::new()
            .with_type("urn:Endpoint")
            .with("urn:label", Value::literal(" endpoint "));
        let mut entity = Entity::new().with(vocab::DISTRIBUTION, Value::Nested(endpoint));

        let fixture = Fixture::new(InMemoryCatalog::new());
        let services = fixture.services();
        let facade = RuleFacade::new(CrudAction::Create, "group");
        let mut uow = UnitOfWork::new();
        RuleDispatcher::new().validate(&mut entity, &[distribution], &facade, &services, &mut uow);

        let nested = entity.nested(vocab::DISTRIBUTION).next().unwrap();
        assert_eq!(nested.values("urn:label"), &[Value::literal("endpoint")]);
    }

    #[test]
    fn test_update_overwrites_immutable_keys() {
        let persisted = Entity::with_id("urn:r")
            .with_type("urn:Dataset")
            .with(vocab::AUTHOR, Value::literal("owner@example.com"));
        let mut entity = Entity::with_id("urn:r")
            .with_type("urn:Other")
            .with(vocab::AUTHOR, Value::literal("intruder@example.com"))
            .with(vocab::DATE_CREATED, Value::literal("2020-01-01T00:00:00Z"));

        let fixture = Fixture::new(InMemoryCatalog::new());
        let services = fixture.services();
        let facade = RuleFacade::new(CrudAction::Update, "group").with_persisted(Some(&persisted));
        let mut uow = UnitOfWork::new();
        RuleDispatcher::new().validate(&mut entity, &[], &facade, &services, &mut uow);

        assert_eq!(entity.entity_type(), Some("urn:Dataset"));
        assert_eq!(entity.first_str(vocab::AUTHOR), Some("owner@example.com"));
        // persisted version holds no creation date
        assert!(entity.values(vocab::DATE_CREATED).is_empty());
    }
}
