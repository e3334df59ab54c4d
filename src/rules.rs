pub(crate) mod check;
pub(crate) mod load_rule;

use serde::{Deserialize, Serialize};

use crate::dom::Selector;
use crate::pattern::CompiledPattern;

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct RuleMetadata {
    pub name: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Click,
    Submit,
    Change,
    View,
}

/// Which kind of source a field mapping extracts from. Closed set; dispatch
/// goes through the extractor table built at startup.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Element,
    RequestBody,
    ResponseBody,
    RequestUrl,
    Cookie,
    LocalStorage,
    SessionStorage,
}

impl FieldSource {
    /// Sources whose data only exists once a later network call completes.
    pub(crate) fn is_network(&self) -> bool {
        matches!(self, FieldSource::RequestBody | FieldSource::ResponseBody)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TriggerSpec {
    pub on: TriggerKind,
    /// Selector the interacted element (or one of its ancestors) must match.
    pub target: String,
    #[serde(skip)]
    pub(crate) target_cache: Option<Selector>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Local,
    Session,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Current page path must fit the pattern.
    UrlMatches {
        pattern: String,
        #[serde(skip)]
        pattern_cache: Option<CompiledPattern>,
    },
    /// A storage key must hold exactly the given value.
    StorageEquals {
        area: StorageKind,
        key: String,
        equals: String,
    },
}

/// Designator for url-source mappings, parsed out of the mapping's `value`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum UrlPart {
    QueryParam(String),
    PathSegment(usize),
    Hash,
}

/// One output field and where to extract it from.
#[derive(Debug, Deserialize, Clone)]
pub struct FieldMapping {
    pub field: String,
    pub source: FieldSource,
    /// Selector, storage key path or url part designator, depending on source.
    #[serde(default)]
    pub value: Option<String>,
    /// Marks the mapping as carrying the user identity. When synchronous
    /// extraction misses it, the identity side channel is awaited instead of
    /// silently dropping the field.
    #[serde(default)]
    pub identity: bool,
    // Network sources carry their own locator triple instead of `value`
    #[serde(default)]
    pub request_url_pattern: Option<String>,
    #[serde(default)]
    pub request_method: Option<String>,
    #[serde(default)]
    pub request_body_path: Option<String>,

    // "service" fields, filled by check_up()
    #[serde(skip)]
    pub(crate) selector_cache: Option<Selector>,
    #[serde(skip)]
    pub(crate) pattern_cache: Option<CompiledPattern>,
    #[serde(skip)]
    pub(crate) url_part_cache: Option<UrlPart>,
    #[serde(skip)]
    pub(crate) body_path_cache: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Rule {
    // These are "working" fields, to be used by rule authors
    pub metadata: RuleMetadata,
    pub id: String,
    /// Event type stamped on the finished event, e.g. "rating" or "add_to_cart".
    pub event_type: String,
    /// Which mapping's field holds the item identity, for deduplication.
    #[serde(default)]
    pub item_field: Option<String>,
    pub trigger: TriggerSpec,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub mappings: Vec<FieldMapping>,
}

impl Rule {
    pub fn get_id(&self) -> &str {
        &self.id
    }

    pub fn needs_network_data(&self) -> bool {
        self.mappings.iter().any(|m| m.source.is_network())
    }
}
