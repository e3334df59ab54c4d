use std::collections::HashMap;

use log::debug;

use crate::extract::{ExtractionContext, ExtractorTable};
use crate::rules::{FieldMapping, Rule};

/// Resolves every field mapping of a rule against one context and assembles a
/// flat field→value record. Nothing is required at this layer: mappings that
/// yield no value are simply absent from the result, and the execution
/// context decides later which absences matter.
pub(crate) struct PayloadBuilder {
    extractors: ExtractorTable,
}

impl PayloadBuilder {
    pub(crate) fn new() -> Self {
        PayloadBuilder {
            extractors: ExtractorTable::new(),
        }
    }

    pub(crate) fn build(&self, ctx: &ExtractionContext, rule: &Rule) -> HashMap<String, String> {
        let mut result = HashMap::with_capacity(rule.mappings.len());

        for mapping in rule.mappings.iter() {
            match self.extractors.extract(mapping, ctx) {
                Some(value) if !value.is_empty() => {
                    result.insert(mapping.field.clone(), value);
                }
                _ => {
                    debug!(
                        "Rule '{}': no value for field '{}' from {:?}",
                        rule.get_id(),
                        &mapping.field,
                        mapping.source
                    );
                }
            }
        }

        result
    }

    pub(crate) fn extract_one(&self, mapping: &FieldMapping, ctx: &ExtractionContext) -> Option<String> {
        self.extractors.extract(mapping, ctx)
    }
}
