//! Identifier Templates - Regex-Derived PID URI Contracts
//!
//! A template is flattened to `base_url + route + <id> + suffix` where the id
//! part is either a GUID or a decimal number.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::external::TemplateSource;

pub type TemplateId = String;

pub const GUID_PATTERN: &str =
    "[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}";

const NUMBER_PATTERN: &str = r"(\d+)";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template {template} has unknown id type: {id_type}")]
    UnknownIdType { template: String, id_type: String },

    #[error("Template {0} produced an invalid regex: {1}")]
    InvalidRegex(String, #[source] regex::Error),

    #[error("Failed to read templates: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse template {0}: {1}")]
    Parse(String, #[source] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdType {
    Guid,
    Number,
}

impl FromStr for IdType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Guid" => Ok(IdType::Guid),
            "Number" => Ok(IdType::Number),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PidUriTemplate {
    pub id: TemplateId,
    pub base_url: String,
    #[serde(default)]
    pub route: String,
    pub id_type: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default)]
    pub deprecated: bool,
}

impl PidUriTemplate {
    pub fn id_type(&self) -> Result<IdType, TemplateError> {
        self.id_type.parse().map_err(|_| TemplateError::UnknownIdType {
            template: self.id.clone(),
            id_type: self.id_type.clone(),
        })
    }

    /// `^{base_url}{route}{id}{suffix}$` with the literal parts escaped.
    pub fn pattern(&self) -> Result<String, TemplateError> {
        let id_part = match self.id_type()? {
            IdType::Guid => GUID_PATTERN,
            IdType::Number => NUMBER_PATTERN,
        };
        Ok(format!(
            "^{}{}{}{}$",
            regex::escape(&self.base_url),
            regex::escape(&self.route),
            id_part,
            regex::escape(&self.suffix)
        ))
    }

    pub fn regex(&self) -> Result<Regex, TemplateError> {
        let pattern = self.pattern()?;
        Regex::new(&pattern).map_err(|e| TemplateError::InvalidRegex(self.id.clone(), e))
    }

    pub fn matches(&self, candidate: &str) -> Result<bool, TemplateError> {
        Ok(self.regex()?.is_match(candidate))
    }

    /// Builds an identifier from the id part.
    pub fn render(&self, id_part: &str) -> String {
        format!("{}{}{}{}", self.base_url, self.route, id_part, self.suffix)
    }

    /// Numeric id part of `candidate` for Number templates.
    pub fn number_of(&self, candidate: &str) -> Option<u64> {
        if self.id_type().ok()? != IdType::Number {
            return None;
        }
        let caps = self.regex().ok()?.captures(candidate)?;
        caps.get(1)?.as_str().parse().ok()
    }
}

/// Template registry - loads and caches templates.
///
/// Iteration follows registration order, which makes "first matching
/// template" deterministic.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: IndexMap<TemplateId, PidUriTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` file in `dir`, in file-name order. A missing
    /// directory yields an empty registry; a malformed template is an error.
    pub fn load_from_dir(dir: &Path) -> Result<Self, TemplateError> {
        let mut registry = Self::new();
        if !dir.exists() {
            tracing::warn!(dir = %dir.display(), "template directory does not exist");
            return Ok(registry);
        }

        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map_or(false, |e| e == "json"))
            .collect();
        paths.sort();

        for path in paths {
            let content = fs::read_to_string(&path)?;
            let template: PidUriTemplate = serde_json::from_str(&content)
                .map_err(|e| TemplateError::Parse(path.display().to_string(), e))?;
            registry.register(template)?;
        }

        tracing::debug!(count = registry.templates.len(), "loaded identifier templates");
        Ok(registry)
    }

    /// Registers a template after checking that it yields a usable regex.
    pub fn register(&mut self, template: PidUriTemplate) -> Result<(), TemplateError> {
        template.regex()?;
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&PidUriTemplate> {
        self.templates.get(id)
    }

    pub fn list(&self) -> Vec<&PidUriTemplate> {
        self.templates.values().collect()
    }
}

impl TemplateSource for TemplateRegistry {
    fn all_templates(&self) -> Vec<PidUriTemplate> {
        self.templates.values().cloned().collect()
    }

    fn template_by_id(&self, id: &str) -> Option<PidUriTemplate> {
        self.templates.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guid_template() -> PidUriTemplate {
        PidUriTemplate {
            id: "tpl-guid".into(),
            base_url: "https://pid.example.com/".into(),
            route: "DATA/".into(),
            id_type: "Guid".into(),
            suffix: "".into(),
            deprecated: false,
        }
    }

    #[test]
    fn test_guid_pattern() {
        let t = guid_template();
        assert!(t
            .matches("https://pid.example.com/DATA/7a0b3c1e-22d4-4f0e-9b6a-0c1d2e3f4a5b")
            .unwrap());
        assert!(!t.matches("https://pid.example.com/DATA/not-a-guid").unwrap());
        assert!(!t
            .matches("https://pid.example.com/DATA/7a0b3c1e-22d4-4f0e-9b6a-0c1d2e3f4a5")
            .unwrap());
    }

    #[test]
    fn test_literal_parts_are_escaped() {
        let t = guid_template();
        // `.` in the base URL must not match arbitrary characters
        assert!(!t
            .matches("https://pidXexample.com/DATA/7a0b3c1e-22d4-4f0e-9b6a-0c1d2e3f4a5b")
            .unwrap());
    }

    #[test]
    fn test_number_pattern_and_capture() {
        let t = PidUriTemplate {
            id_type: "Number".into(),
            suffix: "/".into(),
            ..guid_template()
        };
        assert!(t.matches("https://pid.example.com/DATA/42/").unwrap());
        assert!(!t.matches("https://pid.example.com/DATA/42").unwrap());
        assert_eq!(t.number_of("https://pid.example.com/DATA/42/"), Some(42));
        assert_eq!(t.render("43"), "https://pid.example.com/DATA/43/");
    }

    #[test]
    fn test_unknown_id_type_is_configuration_error() {
        let t = PidUriTemplate {
            id_type: "Ulid".into(),
            ..guid_template()
        };
        assert!(matches!(t.regex(), Err(TemplateError::UnknownIdType { .. })));
        let mut registry = TemplateRegistry::new();
        assert!(registry.register(t).is_err());
    }

    #[test]
    fn test_load_from_dir_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        let second = PidUriTemplate { id: "b".into(), ..guid_template() };
        let first = PidUriTemplate { id: "a".into(), ..guid_template() };
        fs::write(dir.path().join("20-b.json"), serde_json::to_string(&second).unwrap()).unwrap();
        fs::write(dir.path().join("10-a.json"), serde_json::to_string(&first).unwrap()).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = TemplateRegistry::load_from_dir(dir.path()).unwrap();
        let ids: Vec<_> = registry.list().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_load_from_missing_dir_is_empty() {
        let registry = TemplateRegistry::load_from_dir(Path::new("/nonexistent/templates")).unwrap();
        assert!(registry.list().is_empty());
    }
}
