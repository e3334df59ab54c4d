pub(crate) mod body;
pub(crate) mod element;
pub(crate) mod storage;
pub(crate) mod url;

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use crate::dom::{Dom, NodeId};
use crate::net::NetworkExchange;
use crate::ports::{PageLocation, StorageArea};
use crate::rules::{FieldMapping, FieldSource};

use body::BodyExtractor;
use element::ElementExtractor;
use storage::{StorageExtractor, StorageRoot};
use url::UrlExtractor;

/// Everything extraction is allowed to see at one instant: the interacted
/// element (if any), the intercepted exchange (if any), the page location and
/// the storage areas. Fields are optional on purpose; an extractor that needs
/// a missing piece simply yields nothing.
pub struct ExtractionContext<'a> {
    pub dom: Option<&'a Dom>,
    pub target: Option<NodeId>,
    pub exchange: Option<&'a NetworkExchange>,
    pub location: &'a PageLocation,
    pub local: &'a dyn StorageArea,
    pub session: &'a dyn StorageArea,
    pub cookies: &'a str,
    pub ancestor_hops: usize,
}

/// One extractor per source kind. Never panics, never errors: any fault at
/// all comes back as `None` and the caller decides what "no value" means.
pub(crate) trait Extract {
    fn extract(&self, mapping: &FieldMapping, ctx: &ExtractionContext) -> Option<String>;
}

/// Closed dispatch table, built once at startup.
pub(crate) struct ExtractorTable {
    table: HashMap<FieldSource, Box<dyn Extract>>,
}

impl ExtractorTable {
    pub(crate) fn new() -> Self {
        let mut table: HashMap<FieldSource, Box<dyn Extract>> = HashMap::new();

        table.insert(FieldSource::Element, Box::new(ElementExtractor));
        table.insert(FieldSource::RequestBody, Box::new(BodyExtractor { from_response: false }));
        table.insert(FieldSource::ResponseBody, Box::new(BodyExtractor { from_response: true }));
        table.insert(FieldSource::RequestUrl, Box::new(UrlExtractor));
        table.insert(FieldSource::Cookie, Box::new(StorageExtractor { root: StorageRoot::Cookie }));
        table.insert(FieldSource::LocalStorage, Box::new(StorageExtractor { root: StorageRoot::Local }));
        table.insert(FieldSource::SessionStorage, Box::new(StorageExtractor { root: StorageRoot::Session }));

        ExtractorTable { table }
    }

    pub(crate) fn extract(&self, mapping: &FieldMapping, ctx: &ExtractionContext) -> Option<String> {
        self.table.get(&mapping.source)?.extract(mapping, ctx)
    }
}

/// Walks a parsed JSON value along a dotted path. Numeric segments index
/// arrays. A value landing on an object or array is re-serialized; scalars
/// are coerced to their bare string form.
pub(crate) fn walk_json(value: &JsonValue, path: &[String]) -> Option<String> {
    let mut current = value;

    for segment in path.iter() {
        current = match current {
            JsonValue::Object(map) => map.get(segment)?,
            JsonValue::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }

    json_to_string(current)
}

pub(crate) fn json_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        other => serde_json::to_string(other).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn walk_json_handles_objects_arrays_and_scalars() {
        let value = json!({
            "order": {
                "items": [{"sku": "A-1"}, {"sku": "B-2"}],
                "total": 19.5,
                "paid": true
            }
        });

        let path = |s: &str| s.split('.').map(str::to_string).collect::<Vec<_>>();

        assert_eq!(walk_json(&value, &path("order.items.1.sku")).as_deref(), Some("B-2"));
        assert_eq!(walk_json(&value, &path("order.total")).as_deref(), Some("19.5"));
        assert_eq!(walk_json(&value, &path("order.paid")).as_deref(), Some("true"));
        assert_eq!(
            walk_json(&value, &path("order.items.0")).as_deref(),
            Some("{\"sku\":\"A-1\"}")
        );
        assert_eq!(walk_json(&value, &path("order.missing")), None);
        assert_eq!(walk_json(&value, &path("order.items.7")), None);
    }

    #[test]
    fn null_yields_nothing() {
        let value = json!({ "a": null });
        let path = vec!["a".to_string()];
        assert_eq!(walk_json(&value, &path), None);
    }
}
