use log::debug;

use crate::rules::FieldMapping;

use super::{Extract, ExtractionContext};

/// Pulls a value out of the interacted element's surroundings: first the
/// element's own subtree, then a bounded climb through its ancestors, then
/// the whole document. A value-less `[attr]` tail on the locator reads that
/// attribute; otherwise the control value or rendered text is taken.
pub(crate) struct ElementExtractor;

impl Extract for ElementExtractor {
    fn extract(&self, mapping: &FieldMapping, ctx: &ExtractionContext) -> Option<String> {
        let selector = mapping.selector_cache.as_ref()?;
        let dom = ctx.dom?;
        let target = ctx.target?;

        let mut found = dom.select_first(target, selector);

        if found.is_none() {
            let mut scope = dom.parent(target);
            for _ in 0..ctx.ancestor_hops {
                let ancestor = match scope {
                    Some(a) => a,
                    None => break,
                };

                found = dom.select_first(ancestor, selector);
                if found.is_some() {
                    break;
                }

                scope = dom.parent(ancestor);
            }
        }

        if found.is_none() {
            if let Some(root) = dom.root() {
                found = dom.select_first(root, selector);
            }
        }

        let node = match found {
            Some(node) => node,
            None => {
                debug!("No element matched locator for field '{}'", &mapping.field);
                return None;
            }
        };

        let value = match selector.trailing_attribute() {
            Some(attr) => dom.attribute(node, attr).map(str::to_string),
            None => dom.readable_value(node),
        };

        value.filter(|v| !v.is_empty())
    }
}
