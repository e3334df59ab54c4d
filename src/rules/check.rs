use std::collections::HashSet;
use std::fmt::Display;

use crate::dom::Selector;
use crate::error::TrackError;
use crate::pattern::CompiledPattern;

use super::{Condition, FieldSource, Rule, UrlPart};

const KNOWN_METHODS: [&str; 6] = ["get", "post", "put", "patch", "delete", "head"];

impl Rule {
    fn make_error<T: Display>(&self, possible_details: Option<T>) -> TrackError {
        if let Some(details) = possible_details {
            TrackError(format!("Rule {} has the problem. {}", self.id.as_str(), details))
        }
        else {
            TrackError(format!("Rule {} has an undefined error!", self.id.as_str()))
        }
    }

    /// Validates the rule and fills every locator cache, so the hot paths
    /// never parse selectors, patterns or dotted paths again.
    pub fn check_up(&mut self) -> Result<(), TrackError> {
        if self.id.trim().is_empty() {
            return Err(TrackError::new("Rule with empty id"));
        }

        if self.event_type.trim().is_empty() {
            return Err(self.make_error(Some("event_type must not be empty")));
        }

        if let Some(item_field) = self.item_field.as_ref() {
            if !self.mappings.iter().any(|m| &m.field == item_field) {
                return Err(self.make_error(Some(format!(
                    "item_field '{}' does not name any mapping",
                    item_field
                ))));
            }
        }

        // Compile the trigger target selector
        self.trigger.target_cache = match Selector::parse(&self.trigger.target) {
            Ok(selector) => Some(selector),
            Err(err) => {
                return Err(self.make_error(Some(format!(
                    "cannot parse trigger target '{}': {}",
                    &self.trigger.target, err
                ))));
            }
        };

        // Compile condition patterns
        for condition in self.conditions.iter_mut() {
            if let Condition::UrlMatches { pattern, pattern_cache } = condition {
                match CompiledPattern::compile(pattern) {
                    Ok(compiled) => *pattern_cache = Some(compiled),
                    Err(err) => {
                        let details = format!("bad condition pattern '{}': {}", pattern, err);
                        return Err(TrackError(format!("Rule {} has the problem. {}", self.id, details)));
                    }
                }
            }
        }

        // Check mappings and fill their caches
        let mut seen_fields: HashSet<&str> = HashSet::new();
        let rule_id = self.id.clone();

        for mapping in self.mappings.iter_mut() {
            let err_prefix = format!("Rule {} has the problem. ", &rule_id);

            if mapping.field.trim().is_empty() {
                return Err(TrackError(format!("{}mapping with empty field name", err_prefix)));
            }

            if !seen_fields.insert(mapping.field.as_str()) {
                // duplicates would silently shadow each other at collection time
                return Err(TrackError(format!(
                    "{}duplicate mapping for field '{}'",
                    err_prefix, &mapping.field
                )));
            }

            match mapping.source {
                FieldSource::Element => {
                    let value = mapping.value.as_deref().unwrap_or("");
                    match Selector::parse(value) {
                        Ok(selector) => mapping.selector_cache = Some(selector),
                        Err(err) => {
                            return Err(TrackError(format!(
                                "{}field '{}' has unusable selector: {}",
                                err_prefix, &mapping.field, err
                            )));
                        }
                    }
                }
                FieldSource::RequestBody | FieldSource::ResponseBody => {
                    let pattern = mapping.request_url_pattern.as_deref().unwrap_or("");
                    match CompiledPattern::compile(pattern) {
                        Ok(compiled) => mapping.pattern_cache = Some(compiled),
                        Err(err) => {
                            return Err(TrackError(format!(
                                "{}field '{}' has unusable request_url_pattern: {}",
                                err_prefix, &mapping.field, err
                            )));
                        }
                    }

                    let method = mapping
                        .request_method
                        .as_deref()
                        .unwrap_or("")
                        .to_lowercase();
                    if !KNOWN_METHODS.contains(&method.as_str()) {
                        return Err(TrackError(format!(
                            "{}field '{}' has unknown request_method '{}'",
                            err_prefix,
                            &mapping.field,
                            mapping.request_method.as_deref().unwrap_or("")
                        )));
                    }
                    mapping.request_method = Some(method);

                    let body_path = mapping.request_body_path.as_deref().unwrap_or("");
                    if body_path.is_empty() {
                        return Err(TrackError(format!(
                            "{}field '{}' is missing request_body_path",
                            err_prefix, &mapping.field
                        )));
                    }
                    mapping.body_path_cache =
                        Some(body_path.split('.').map(str::to_string).collect());
                }
                FieldSource::RequestUrl => {
                    let value = mapping.value.as_deref().unwrap_or("");
                    mapping.url_part_cache = Some(parse_url_part(value).map_err(|err| {
                        TrackError(format!(
                            "{}field '{}' has unusable url part: {}",
                            err_prefix, &mapping.field, err
                        ))
                    })?);
                }
                FieldSource::Cookie | FieldSource::LocalStorage | FieldSource::SessionStorage => {
                    let value = mapping.value.as_deref().unwrap_or("");
                    if value.is_empty() {
                        return Err(TrackError(format!(
                            "{}field '{}' is missing a storage key",
                            err_prefix, &mapping.field
                        )));
                    }
                    mapping.body_path_cache =
                        Some(value.split('.').map(str::to_string).collect());
                }
            }
        }

        Ok(())
    }
}

/// `query_param:<name>`, `pathname:<zero-based index>` or `hash`.
fn parse_url_part(value: &str) -> Result<UrlPart, TrackError> {
    if value == "hash" {
        return Ok(UrlPart::Hash);
    }

    if let Some(name) = value.strip_prefix("query_param:") {
        if name.is_empty() {
            return Err(TrackError::new("query_param designator without a name"));
        }
        return Ok(UrlPart::QueryParam(name.to_string()));
    }

    if let Some(index) = value.strip_prefix("pathname:") {
        let index: usize = index
            .parse()
            .map_err(|_| TrackError::new(format!("bad pathname index '{}'", index)))?;
        return Ok(UrlPart::PathSegment(index));
    }

    Err(TrackError::new(format!("unknown url part designator '{}'", value)))
}
