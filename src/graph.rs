//! Graph Canonicalizer
//!
//! Turns an entity and its metadata into triples the constraint evaluator can
//! walk. Literals take the datatype the metadata declares for their key;
//! nested entities become subjects of their own.

use std::collections::HashMap;
use std::fmt;

use crate::entity::{Entity, Value};
use crate::metadata::{self, MetadataProperty};
use crate::vocab;

/// Location of a nested entity: `(key, index)` steps from the root.
pub type EntityPath = Vec<(String, usize)>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    Iri(String),
    Blank(String),
    Literal { value: String, datatype: String },
}

impl Term {
    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal { .. })
    }

    /// Lexical form used for pattern checks and reporting.
    pub fn lexical(&self) -> &str {
        match self {
            Term::Iri(s) | Term::Blank(s) => s,
            Term::Literal { value, .. } => value,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{}>", iri),
            Term::Blank(label) => write!(f, "_:{}", label),
            Term::Literal { value, datatype } => {
                write!(f, "\"{}\"^^<{}>", escape_literal(value), datatype)
            }
        }
    }
}

fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Triple {
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
}

#[derive(Debug, Clone)]
pub struct CanonicalGraph {
    triples: Vec<Triple>,
    locations: HashMap<Term, EntityPath>,
    root: Term,
}

impl CanonicalGraph {
    pub fn root(&self) -> &Term {
        &self.root
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    /// Every subject with an `rdf:type` of `class`.
    pub fn subjects_of_type(&self, class: &str) -> Vec<&Term> {
        self.triples
            .iter()
            .filter(|t| t.predicate == vocab::RDF_TYPE && t.object == Term::Iri(class.to_string()))
            .map(|t| &t.subject)
            .collect()
    }

    pub fn objects(&self, subject: &Term, predicate: &str) -> Vec<&Term> {
        self.triples
            .iter()
            .filter(|t| &t.subject == subject && t.predicate == predicate)
            .map(|t| &t.object)
            .collect()
    }

    pub fn location(&self, subject: &Term) -> Option<&EntityPath> {
        self.locations.get(subject)
    }

    pub fn remove(&mut self, subject: &Term, predicate: &str, object: Option<&Term>) {
        self.triples.retain(|t| {
            !(&t.subject == subject
                && t.predicate == predicate
                && object.map_or(true, |o| &t.object == o))
        });
    }

    /// N-Triples, one statement per line, sorted for stable audit output.
    pub fn serialize(&self) -> String {
        let mut lines: Vec<String> = self
            .triples
            .iter()
            .map(|t| format!("{} <{}> {} .", t.subject, t.predicate, t.object))
            .collect();
        lines.sort();
        lines.join("\n")
    }
}

pub fn canonicalize(entity: &Entity, metadata: &[MetadataProperty]) -> CanonicalGraph {
    let mut builder = Builder {
        triples: Vec::new(),
        locations: HashMap::new(),
        next_blank: 0,
    };
    let root = builder.add_entity(entity, metadata, Vec::new());
    CanonicalGraph {
        triples: builder.triples,
        locations: builder.locations,
        root,
    }
}

struct Builder {
    triples: Vec<Triple>,
    locations: HashMap<Term, EntityPath>,
    next_blank: usize,
}

impl Builder {
    fn subject_for(&mut self, entity: &Entity) -> Term {
        match &entity.id {
            Some(id) => Term::Iri(id.clone()),
            None => {
                let label = format!("b{}", self.next_blank);
                self.next_blank += 1;
                Term::Blank(label)
            }
        }
    }

    fn add_entity(&mut self, entity: &Entity, metadata: &[MetadataProperty], path: EntityPath) -> Term {
        let subject = self.subject_for(entity);
        self.locations.insert(subject.clone(), path.clone());

        for (key, values) in &entity.properties {
            let property = metadata::find(metadata, key);
            let datatype = property
                .and_then(|p| p.datatype.clone())
                .unwrap_or_else(|| vocab::XSD_STRING.to_string());

            for (index, value) in values.iter().enumerate() {
                let object = match value {
                    Value::Literal(text) => Term::Literal {
                        value: text.clone(),
                        datatype: datatype.clone(),
                    },
                    Value::Reference(iri) => Term::Iri(iri.clone()),
                    Value::Nested(nested) => {
                        let nested_metadata = nested
                            .entity_type()
                            .and_then(|t| property.and_then(|p| p.nested_for(t)))
                            .unwrap_or(&[]);
                        let mut nested_path = path.clone();
                        nested_path.push((key.clone(), index));
                        self.add_entity(nested, nested_metadata, nested_path)
                    }
                };
                self.triples.push(Triple {
                    subject: subject.clone(),
                    predicate: key.clone(),
                    object,
                });
            }
        }

        subject
    }
}
