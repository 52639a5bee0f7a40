// --- Concrete Rules ---

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{CrudAction, PropertyRule, RuleContext, RuleInput, RuleOutcome};
use crate::entity::{Entity, Value};
use crate::identifiers::{IdentifierEngine, IdentifierError};
use crate::validation::Severity;
use crate::vocab;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid"));

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// RFC 3339, a local date-time or a bare date, normalized to UTC seconds.
/// Values without an offset are read as UTC.
pub(crate) fn normalize_datetime(value: &str) -> Option<String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp(parsed.with_timezone(&Utc)));
    }
    if let Ok(local) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(timestamp(local.and_utc()));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    Some(timestamp(date.and_hms_opt(0, 0, 0)?.and_utc()))
}

pub struct WhitespaceRule;

impl PropertyRule for WhitespaceRule {
    fn name(&self) -> &'static str {
        "whitespace"
    }

    fn apply(&self, input: &RuleInput<'_>, _ctx: &mut RuleContext<'_, '_>) -> RuleOutcome {
        let trimmed: Vec<Value> = input
            .values
            .iter()
            .filter_map(|value| match value {
                Value::Literal(text) => {
                    let text = text.trim();
                    (!text.is_empty()).then(|| Value::literal(text))
                }
                other => Some(other.clone()),
            })
            .collect();

        if trimmed.as_slice() == input.values {
            RuleOutcome::none()
        } else {
            RuleOutcome::patched(trimmed)
        }
    }
}

pub struct DateTimeRule;

impl PropertyRule for DateTimeRule {
    fn name(&self) -> &'static str {
        "datetime"
    }

    fn apply(&self, input: &RuleInput<'_>, _ctx: &mut RuleContext<'_, '_>) -> RuleOutcome {
        let mut outcome = RuleOutcome::none();
        let mut normalized = Vec::with_capacity(input.values.len());

        for value in input.values {
            match value {
                Value::Literal(text) => match normalize_datetime(text) {
                    Some(stamp) => normalized.push(Value::Literal(stamp)),
                    None => {
                        outcome.results.push(
                            input
                                .result(self.name(), format!("{} is not a valid date or date-time", text), Severity::Violation)
                                .with_value(text.clone()),
                        );
                        normalized.push(value.clone());
                    }
                },
                other => normalized.push(other.clone()),
            }
        }

        if normalized.as_slice() != input.values {
            outcome.patch = Some(normalized);
        }
        outcome
    }
}

pub struct LifecycleDatesRule;

impl PropertyRule for LifecycleDatesRule {
    fn name(&self) -> &'static str {
        "lifecycle-dates"
    }

    fn apply(&self, input: &RuleInput<'_>, ctx: &mut RuleContext<'_, '_>) -> RuleOutcome {
        if !input.is_root {
            return RuleOutcome::none();
        }
        let now = Value::Literal(timestamp(ctx.facade.now));

        match input.key {
            vocab::DATE_MODIFIED => RuleOutcome::patched(vec![now]),
            vocab::DATE_CREATED if ctx.facade.action == CrudAction::Create && input.values.is_empty() => {
                RuleOutcome::patched(vec![now])
            }
            _ => RuleOutcome::none(),
        }
    }
}

pub struct LastChangeUserRule;

impl PropertyRule for LastChangeUserRule {
    fn name(&self) -> &'static str {
        "last-change-user"
    }

    fn apply(&self, input: &RuleInput<'_>, ctx: &mut RuleContext<'_, '_>) -> RuleOutcome {
        match ctx.facade.user {
            Some(user) if input.is_root => RuleOutcome::patched(vec![Value::literal(user)]),
            _ => RuleOutcome::none(),
        }
    }
}

pub struct UrlRule;

impl PropertyRule for UrlRule {
    fn name(&self) -> &'static str {
        "url"
    }

    fn apply(&self, input: &RuleInput<'_>, _ctx: &mut RuleContext<'_, '_>) -> RuleOutcome {
        let mut outcome = RuleOutcome::none();
        for value in input.values.iter().filter(|v| v.as_entity().is_none()) {
            let Some(text) = value.as_str() else { continue };
            if let Err(e) = url::Url::parse(text) {
                outcome.results.push(
                    input
                        .result(self.name(), format!("{} is not an absolute URL: {}", text, e), Severity::Violation)
                        .with_value(text),
                );
            }
        }
        outcome
    }
}

pub struct PersonRule;

impl PropertyRule for PersonRule {
    fn name(&self) -> &'static str {
        "person"
    }

    fn apply(&self, input: &RuleInput<'_>, ctx: &mut RuleContext<'_, '_>) -> RuleOutcome {
        let mut outcome = RuleOutcome::none();
        let mut values = input.values.to_vec();

        if values.is_empty() && input.key == vocab::AUTHOR && ctx.facade.action == CrudAction::Create {
            if let Some(user) = ctx.facade.user {
                values.push(Value::literal(user));
                outcome.patch = Some(values.clone());
            }
        }

        for email in values.iter().filter_map(Value::as_str) {
            if !EMAIL.is_match(email) {
                outcome.results.push(
                    input
                        .result(self.name(), format!("{} is not a valid e-mail address", email), Severity::Violation)
                        .with_value(email),
                );
                continue;
            }
            match ctx.services.references.person_exists(email) {
                Ok(true) => {}
                Ok(false) => outcome.results.push(
                    input
                        .result(self.name(), format!("No person is known with e-mail address {}", email), Severity::Warning)
                        .with_value(email),
                ),
                Err(e) => {
                    tracing::warn!(%email, error = %e, "person lookup failed");
                    outcome.results.push(
                        input
                            .result(self.name(), format!("Person {} could not be verified: {}", email, e), Severity::Warning)
                            .with_value(email),
                    );
                }
            }
        }

        outcome
    }
}

/// Literal values become references; everything else is kept.
fn as_references(values: &[Value]) -> Vec<Value> {
    values
        .iter()
        .map(|value| match value {
            Value::Literal(text) => Value::reference(text.clone()),
            other => other.clone(),
        })
        .collect()
}

pub struct TaxonomyRule;

impl PropertyRule for TaxonomyRule {
    fn name(&self) -> &'static str {
        "taxonomy"
    }

    fn apply(&self, input: &RuleInput<'_>, ctx: &mut RuleContext<'_, '_>) -> RuleOutcome {
        let references = as_references(input.values);
        let mut outcome = if references.as_slice() == input.values {
            RuleOutcome::none()
        } else {
            RuleOutcome::patched(references.clone())
        };

        let Some(range) = input.property.range.as_deref() else {
            tracing::debug!(key = input.key, "taxonomy property without range");
            return outcome;
        };

        for term in references.iter().filter_map(Value::as_str) {
            match ctx.services.taxonomy.contains(range, term) {
                Ok(true) => {}
                Ok(false) => outcome.results.push(
                    input
                        .result(self.name(), format!("{} is not a term of {}", term, range), Severity::Violation)
                        .with_value(term),
                ),
                Err(e) => {
                    tracing::warn!(%term, %range, error = %e, "taxonomy lookup failed");
                    outcome.results.push(
                        input
                            .result(self.name(), format!("Term {} could not be verified: {}", term, e), Severity::Warning)
                            .with_value(term),
                    );
                }
            }
        }

        outcome
    }
}

pub struct LinkTypeRule;

impl PropertyRule for LinkTypeRule {
    fn name(&self) -> &'static str {
        "link-type"
    }

    fn apply(&self, input: &RuleInput<'_>, ctx: &mut RuleContext<'_, '_>) -> RuleOutcome {
        let references = as_references(input.values);
        let mut outcome = if references.as_slice() == input.values {
            RuleOutcome::none()
        } else {
            RuleOutcome::patched(references.clone())
        };
        let own_pid = ctx.facade.resource_pid.as_deref();

        for target in references.iter().filter_map(Value::as_str) {
            if Some(target) == own_pid {
                outcome.results.push(
                    input
                        .result(self.name(), "A resource cannot link to itself", Severity::Violation)
                        .with_value(target),
                );
                continue;
            }
            match ctx.services.references.resource_exists(target) {
                Ok(true) => {}
                Ok(false) => outcome.results.push(
                    input
                        .result(self.name(), format!("The linked resource {} does not exist", target), Severity::Violation)
                        .with_value(target),
                ),
                Err(e) => {
                    tracing::warn!(%target, error = %e, "linked resource lookup failed");
                    outcome.results.push(
                        input
                            .result(self.name(), format!("Linked resource {} could not be verified: {}", target, e), Severity::Warning)
                            .with_value(target),
                    );
                }
            }
        }

        outcome
    }
}

pub struct IdentifierRule;

impl IdentifierRule {
    fn failure(&self, input: &RuleInput<'_>, error: &IdentifierError, value: Option<&str>) -> RuleOutcome {
        let constraint = if error.is_configuration() {
            tracing::warn!(key = input.key, %error, "identifier configuration error");
            "identifier:configuration"
        } else {
            "identifier"
        };
        let mut result = input
            .result(self.name(), error.to_string(), Severity::Violation)
            .with_constraint(constraint);
        if let Some(value) = value {
            result = result.with_value(value);
        }
        RuleOutcome::none().with_result(result)
    }

    /// The identifier entity the resource is stored with.
    fn identifier_entity(existing: Option<&Entity>, identifier: &str, template: Option<&str>) -> Entity {
        let mut pid = existing.cloned().unwrap_or_default();
        pid.id = Some(identifier.to_string());
        if pid.entity_type().is_none() {
            pid.set(vocab::RDF_TYPE, vec![Value::reference(vocab::PERMANENT_IDENTIFIER)]);
        }
        match template {
            Some(template) => pid.set(vocab::HAS_URI_TEMPLATE, vec![Value::reference(template)]),
            None => {
                pid.remove(vocab::HAS_URI_TEMPLATE);
            }
        }
        pid
    }
}

impl PropertyRule for IdentifierRule {
    fn name(&self) -> &'static str {
        "identifier"
    }

    fn apply(&self, input: &RuleInput<'_>, ctx: &mut RuleContext<'_, '_>) -> RuleOutcome {
        let facade = ctx.facade;

        // the overwrite pass restores the persisted identifier
        if input.is_root && facade.action == CrudAction::Update {
            if let Some(persisted) = facade.persisted {
                if !persisted.values(input.key).is_empty() {
                    return RuleOutcome::none();
                }
            }
        }

        let is_pid = input.key == vocab::HAS_PID;
        let existing = match input.values {
            [] if is_pid => None,
            [] => return RuleOutcome::none(),
            [Value::Nested(entity)] => Some(entity),
            [other] if !is_pid => {
                // plain base URI: check it against the templates, keep it as sent
                let Some(identifier) = other.as_str() else { return RuleOutcome::none() };
                let engine = IdentifierEngine::new(
                    ctx.services.templates,
                    ctx.services.permissions,
                    ctx.services.generator,
                );
                return match engine.select_or_generate(input.entity, Some(identifier), None, facade.consumer_group, ctx.uow) {
                    Ok(_) => RuleOutcome::none(),
                    Err(e) => self.failure(input, &e, Some(identifier)),
                };
            }
            [other] => {
                return RuleOutcome::none().with_result(
                    input
                        .result(self.name(), "The permanent identifier must be an entity", Severity::Violation)
                        .with_value(other.as_str().unwrap_or_default()),
                );
            }
            _ => {
                return RuleOutcome::none().with_result(input.result(
                    self.name(),
                    "Only one identifier may be given",
                    Severity::Violation,
                ));
            }
        };

        let identifier = existing.and_then(|e| e.id.as_deref());
        let template = existing.and_then(|e| e.first_str(vocab::HAS_URI_TEMPLATE));
        let engine = IdentifierEngine::new(
            ctx.services.templates,
            ctx.services.permissions,
            ctx.services.generator,
        );

        match engine.select_or_generate(input.entity, identifier, template, facade.consumer_group, ctx.uow) {
            Ok(selection) => {
                let pid = Self::identifier_entity(existing, &selection.identifier, selection.template.as_deref());
                if existing == Some(&pid) {
                    RuleOutcome::none()
                } else {
                    RuleOutcome::patched(vec![Value::Nested(pid)])
                }
            }
            Err(e) => self.failure(input, &e, identifier),
        }
    }
}
