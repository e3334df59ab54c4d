use log::debug;

use crate::rules::FieldMapping;

use super::{walk_json, Extract, ExtractionContext};

/// Dotted-path lookup over an intercepted call's JSON body. A request-body
/// lookup against a GET call redirects to the response body, since a GET
/// carries no meaningful request body.
pub(crate) struct BodyExtractor {
    pub(crate) from_response: bool,
}

impl Extract for BodyExtractor {
    fn extract(&self, mapping: &FieldMapping, ctx: &ExtractionContext) -> Option<String> {
        let exchange = ctx.exchange?;
        let path = mapping.body_path_cache.as_ref()?;

        let use_response = self.from_response || exchange.request.method_is("get");

        let parsed = if use_response {
            exchange.response.as_ref()?.json_body()
        }
        else {
            exchange.request.json_body()
        };

        let parsed = match parsed {
            Some(parsed) => parsed,
            None => {
                debug!(
                    "Body for field '{}' is absent or not JSON ({})",
                    &mapping.field, &exchange.request
                );
                return None;
            }
        };

        walk_json(&parsed, path)
    }
}
