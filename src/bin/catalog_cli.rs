//! Catalog CLI - Engine front end for scripts and fixtures
//!
//! Commands: templates, validate, hash, match
//! Outputs JSON to stdout
//! Returns 2 when a resource does not conform, 1 on errors

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use catalog_core::{
    logging, CatalogServices, EngineConfig, Entity, InMemoryCatalog, ResourcePipeline,
    TemplateRegistry, ValidationRequest,
};

#[derive(Parser)]
#[command(name = "catalog-cli")]
#[command(about = "Catalog CLI - Resource Validation & Identity Engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Catalog fixture (metadata, permissions, corpus) as JSON
    #[arg(short, long)]
    fixture: PathBuf,

    /// Path to identifier templates directory
    #[arg(short, long, default_value = "templates")]
    templates_dir: PathBuf,

    /// Engine configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List identifier templates
    Templates,

    /// Validate a resource
    Validate {
        /// JSON payload (Entity)
        #[arg(short, long)]
        payload: String,

        /// Persisted version as JSON; validates as an update when given
        #[arg(long)]
        persisted: Option<String>,

        /// Strip invalid optional values instead of reporting them
        #[arg(long)]
        lenient: bool,

        /// Consumer group the resource is submitted for
        #[arg(short = 'g', long, default_value = "default")]
        consumer_group: String,

        /// Requesting user (e-mail)
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Compute the content hash of a resource
    Hash {
        /// JSON payload (Entity)
        #[arg(short, long)]
        payload: String,
    },

    /// Check an identifier against a template
    Match {
        /// Template ID
        #[arg(short, long)]
        template: String,

        /// Candidate identifier
        #[arg(short, long)]
        identifier: String,
    },
}

fn emit<T: Serialize>(value: &T) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            true
        }
        Err(e) => {
            println!(r#"{{"error": "Failed to serialize output: {}"}}"#, e);
            false
        }
    }
}

fn fail(message: String) -> ExitCode {
    emit(&serde_json::json!({ "error": message }));
    ExitCode::FAILURE
}

fn parse_entity(payload: &str) -> Result<Entity, String> {
    serde_json::from_str(payload).map_err(|e| format!("Invalid payload: {}", e))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match EngineConfig::load_or_default(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => return fail(e.to_string()),
    };
    if let Err(e) = logging::init_logging(&config.logging) {
        eprintln!("{}", e);
    }

    let catalog = match InMemoryCatalog::load(&cli.fixture) {
        Ok(c) => c,
        Err(e) => return fail(format!("Failed to load fixture: {}", e)),
    };
    let registry = match TemplateRegistry::load_from_dir(&cli.templates_dir) {
        Ok(r) => r,
        Err(e) => return fail(format!("Failed to load templates: {}", e)),
    };

    let services = CatalogServices::in_memory(Arc::new(catalog), Arc::new(registry), config.number_seed);
    let pipeline = ResourcePipeline::new(services, config);

    match cli.command {
        Commands::Templates => {
            let templates: Vec<_> = pipeline
                .list_templates()
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "id": t.id,
                        "pattern": t.pattern().ok(),
                        "idType": t.id_type,
                        "deprecated": t.deprecated,
                    })
                })
                .collect();

            if emit(&templates) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }

        Commands::Validate { payload, persisted, lenient, consumer_group, user } => {
            let entity = match parse_entity(&payload) {
                Ok(e) => e,
                Err(e) => return fail(e),
            };
            let mut request = match persisted.as_deref().map(parse_entity).transpose() {
                Ok(Some(persisted)) => ValidationRequest::update(entity, persisted, consumer_group),
                Ok(None) => ValidationRequest::create(entity, consumer_group),
                Err(e) => return fail(e),
            };
            if lenient {
                request = request.lenient(true);
            }
            if let Some(user) = user {
                request = request.with_user(user);
            }

            match pipeline.validate(&request) {
                Ok(outcome) => {
                    if !emit(&outcome) {
                        ExitCode::FAILURE
                    } else if outcome.conforms {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::from(2)
                    }
                }
                Err(e) => fail(e.to_string()),
            }
        }

        Commands::Hash { payload } => {
            let entity = match parse_entity(&payload) {
                Ok(e) => e,
                Err(e) => return fail(e),
            };
            match pipeline.hash(&entity) {
                Ok(hash) => {
                    emit(&serde_json::json!({ "hash": hash }));
                    ExitCode::SUCCESS
                }
                Err(e) => fail(e.to_string()),
            }
        }

        Commands::Match { template, identifier } => match pipeline.match_template(&template, &identifier) {
            Ok(matches) => {
                emit(&serde_json::json!({ "template": template, "identifier": identifier, "matches": matches }));
                if matches {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(2)
                }
            }
            Err(e) => fail(e.to_string()),
        },
    }
}
