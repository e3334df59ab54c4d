use crate::ports::parse_cookie;
use crate::rules::FieldMapping;

use super::{walk_json, Extract, ExtractionContext};

#[derive(Debug, Clone, Copy)]
pub(crate) enum StorageRoot {
    Cookie,
    Local,
    Session,
}

/// `key` or `key.sub.path` lookups against a storage area or the cookie
/// string. A dotted suffix means the stored value is JSON to walk further.
pub(crate) struct StorageExtractor {
    pub(crate) root: StorageRoot,
}

impl Extract for StorageExtractor {
    fn extract(&self, mapping: &FieldMapping, ctx: &ExtractionContext) -> Option<String> {
        let path = mapping.body_path_cache.as_ref()?;
        let root_key = path.first()?;

        let raw = match self.root {
            StorageRoot::Cookie => parse_cookie(ctx.cookies, root_key),
            StorageRoot::Local => ctx.local.get(root_key),
            StorageRoot::Session => ctx.session.get(root_key),
        }?;

        if path.len() == 1 {
            return if raw.is_empty() { None } else { Some(raw) };
        }

        let parsed: serde_json::Value = serde_json::from_str(&raw).ok()?;
        walk_json(&parsed, &path[1..])
    }
}
