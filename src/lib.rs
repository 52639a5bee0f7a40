//! Catalog Core - Resource Validation & Identity Engine
//!
//! # Guarantees
//! 1. Metadata Is the Schema: shapes and rule dispatch derive from it
//! 2. Identifiers Are Permanent: never rewritten once persisted
//! 3. Identifiers Are Unique: across drafts, published resources and versions
//! 4. Hashes Are Canonical: property and value order never matter
//! 5. Lookups Degrade to Findings: an unreachable directory never aborts a submission

pub mod vocab;
pub mod entity;
pub mod metadata;
pub mod validation;
pub mod external;
pub mod graph;
pub mod shapes;
pub mod structural;
pub mod templates;
pub mod identifiers;
pub mod duplicates;
pub mod rules;
pub mod hashing;
pub mod memory;
pub mod config;
pub mod logging;
pub mod pipeline;

pub use entity::{Entity, Properties, Value};
pub use metadata::{MetadataProperty, NestedMetadata, NodeKind};
pub use validation::{ResultKind, Severity, ValidationResult, ValidationResultProperty};
pub use templates::{IdType, PidUriTemplate, TemplateError, TemplateId, TemplateRegistry};
pub use identifiers::{DefaultIdentifierGenerator, IdentifierEngine, IdentifierError, Selection, UnitOfWork};
pub use duplicates::{DuplicateResolver, DuplicateResult, IdentifierKind, Verdict, VersionOverview};
pub use rules::{CrudAction, MatchCriteria, PropertyRule, RuleDispatcher, ValidatorRecord};
pub use shapes::{ShapeCache, ShapeError, ShapeGraph};
pub use structural::StructuralValidator;
pub use hashing::{canonical_json, compute_report_hash, sha256_hex, EntityHasher, HashError};
pub use memory::InMemoryCatalog;
pub use config::{ConfigError, EngineConfig};
pub use pipeline::{CatalogServices, PipelineError, PipelineOutcome, ResourcePipeline, ValidationRequest};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
