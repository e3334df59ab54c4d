use crate::rules::{FieldMapping, UrlPart};

use super::{Extract, ExtractionContext};

/// Reads from the current page location (never from network traffic):
/// a query parameter, a zero-based path segment, or the hash fragment.
pub(crate) struct UrlExtractor;

impl Extract for UrlExtractor {
    fn extract(&self, mapping: &FieldMapping, ctx: &ExtractionContext) -> Option<String> {
        let part = mapping.url_part_cache.as_ref()?;

        let value = match part {
            UrlPart::QueryParam(name) => ctx.location.query_param(name),
            UrlPart::PathSegment(index) => ctx.location.path_segment(*index),
            UrlPart::Hash => ctx.location.fragment(),
        };

        value.filter(|v| !v.is_empty()).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractorTable;
    use crate::ports::{MemoryStorage, PageLocation};
    use crate::rules::load_rule::rule_from_yaml_str;

    #[test]
    fn url_parts_resolve_from_page_location() {
        let rule = rule_from_yaml_str(
            r#"
metadata:
  name: t
id: t
event_type: t
trigger:
  on: click
  target: "button"
mappings:
  - field: Campaign
    source: request_url
    value: "query_param:utm"
  - field: Category
    source: request_url
    value: "pathname:1"
  - field: Anchor
    source: request_url
    value: "hash"
"#,
        )
        .unwrap();

        let table = ExtractorTable::new();
        let local = MemoryStorage::new();
        let session = MemoryStorage::new();
        let location = PageLocation::parse("https://shop.example/catalog/books/99?utm=mail#reviews");

        let ctx = ExtractionContext {
            dom: None,
            target: None,
            exchange: None,
            location: &location,
            local: &local,
            session: &session,
            cookies: "",
            ancestor_hops: 0,
        };

        let get = |field: &str| {
            let mapping = rule.mappings.iter().find(|m| m.field == field).unwrap();
            table.extract(mapping, &ctx)
        };

        assert_eq!(get("Campaign").as_deref(), Some("mail"));
        assert_eq!(get("Category").as_deref(), Some("books"));
        assert_eq!(get("Anchor").as_deref(), Some("reviews"));
    }
}
