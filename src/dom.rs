use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::TrackError;

/// One element as it arrives from the host integration (or a replay log):
/// a plain tree snapshot of the interacted element's surroundings. The node
/// the interaction actually fired on carries `target: true`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ElementSnapshot {
    pub tag: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub target: bool,
    #[serde(default)]
    pub children: Vec<ElementSnapshot>,
}

pub type NodeId = usize;

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attributes: HashMap<String, String>,
    text: Option<String>,
    value: Option<String>,
    target: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Flattened element tree with parent links, the substrate the element
/// extractor runs its scoped lookups against.
#[derive(Debug, Clone, Default)]
pub struct Dom {
    nodes: Vec<Node>,
}

impl Dom {
    pub fn from_snapshot(root: &ElementSnapshot) -> Self {
        let mut dom = Dom { nodes: Vec::new() };
        dom.insert(root, None);
        dom
    }

    fn insert(&mut self, snapshot: &ElementSnapshot, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            tag: snapshot.tag.to_lowercase(),
            attributes: snapshot.attributes.clone(),
            text: snapshot.text.clone(),
            value: snapshot.value.clone(),
            target: snapshot.target,
            parent,
            children: Vec::new(),
        });

        for child in snapshot.children.iter() {
            let child_id = self.insert(child, Some(id));
            self.nodes[id].children.push(child_id);
        }

        id
    }

    pub fn root(&self) -> Option<NodeId> {
        if self.nodes.is_empty() { None } else { Some(0) }
    }

    /// The node the interaction fired on; falls back to the root when the
    /// snapshot does not mark one.
    pub fn target(&self) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.target)
            .or_else(|| self.root())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.nodes.get(id)?.attributes.get(name).map(String::as_str)
    }

    /// Editable-control value if the node has one, otherwise rendered text
    /// (own text, or concatenated descendant text).
    pub fn readable_value(&self, id: NodeId) -> Option<String> {
        let node = self.nodes.get(id)?;

        if let Some(value) = node.value.as_ref() {
            if !value.is_empty() {
                return Some(value.clone());
            }
        }

        if let Some(text) = node.text.as_ref() {
            if !text.trim().is_empty() {
                return Some(text.trim().to_string());
            }
        }

        let mut parts = Vec::new();
        self.collect_text(id, &mut parts);
        if parts.is_empty() {
            None
        }
        else {
            Some(parts.join(" "))
        }
    }

    fn collect_text(&self, id: NodeId, parts: &mut Vec<String>) {
        for child in self.nodes[id].children.iter() {
            if let Some(text) = self.nodes[*child].text.as_ref() {
                if !text.trim().is_empty() {
                    parts.push(text.trim().to_string());
                }
            }
            self.collect_text(*child, parts);
        }
    }

    /// First match for `selector` inside the subtree rooted at `scope`,
    /// depth-first, `scope` itself included.
    pub fn select_first(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        let mut stack = vec![scope];

        while let Some(id) = stack.pop() {
            if self.selector_matches(id, selector, scope) {
                return Some(id);
            }

            // preserve document order under the LIFO walk
            for child in self.nodes[id].children.iter().rev() {
                stack.push(*child);
            }
        }

        None
    }

    /// Closest-ancestor semantics: the node itself or the nearest ancestor
    /// matching the selector. This is how trigger targets are matched, so a
    /// rule written against a card still fires for a click on its inner span.
    pub fn closest(&self, from: NodeId, selector: &Selector) -> Option<NodeId> {
        let root = self.root()?;
        let mut current = Some(from);

        while let Some(id) = current {
            if self.selector_matches(id, selector, root) {
                return Some(id);
            }
            current = self.parent(id);
        }

        None
    }

    fn selector_matches(&self, id: NodeId, selector: &Selector, scope: NodeId) -> bool {
        let mut compounds = selector.compounds.iter().rev();

        let last = match compounds.next() {
            Some(c) => c,
            None => return false,
        };

        if !self.compound_matches(id, last) {
            return false;
        }

        // Remaining compounds must match ancestors (within the scope) in order.
        let mut current = self.parent(id);
        for compound in compounds {
            let mut found = false;

            while let Some(ancestor) = current {
                let inside_scope = ancestor == scope || self.is_descendant_of(ancestor, scope);
                current = self.parent(ancestor);

                if inside_scope && self.compound_matches(ancestor, compound) {
                    found = true;
                    break;
                }

                if !inside_scope {
                    break;
                }
            }

            if !found {
                return false;
            }
        }

        true
    }

    fn is_descendant_of(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.parent(id);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.parent(p);
        }
        false
    }

    fn compound_matches(&self, id: NodeId, compound: &CompoundSelector) -> bool {
        let node = match self.nodes.get(id) {
            Some(n) => n,
            None => return false,
        };

        if let Some(tag) = compound.tag.as_ref() {
            if node.tag != *tag {
                return false;
            }
        }

        if let Some(wanted_id) = compound.id.as_ref() {
            match node.attributes.get("id") {
                Some(actual) if actual == wanted_id => {}
                _ => return false,
            }
        }

        for class in compound.classes.iter() {
            let has_class = node
                .attributes
                .get("class")
                .map(|cls| cls.split_whitespace().any(|c| c == class))
                .unwrap_or(false);

            if !has_class {
                return false;
            }
        }

        for (name, expected) in compound.attributes.iter() {
            match (node.attributes.get(name), expected) {
                (Some(actual), Some(expected)) if actual == expected => {}
                (Some(_), None) => {}
                _ => return false,
            }
        }

        true
    }
}

/// A parsed locator selector: compound selectors separated by whitespace
/// (descendant combinator). Supported pieces per compound: `tag`, `#id`,
/// `.class`, `[attr]`, `[attr=value]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    compounds: Vec<CompoundSelector>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct CompoundSelector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, TrackError> {
        let mut compounds = Vec::new();

        for token in source.split_whitespace() {
            compounds.push(parse_compound(token)?);
        }

        if compounds.is_empty() {
            return Err(TrackError::new(format!("Empty selector: '{}'", source)));
        }

        Ok(Selector { compounds })
    }

    /// Name of a value-less `[attr]` component on the final compound, if any.
    /// Extraction reads this attribute instead of value/text.
    pub fn trailing_attribute(&self) -> Option<&str> {
        let last = self.compounds.last()?;
        last.attributes
            .iter()
            .find(|(_, v)| v.is_none())
            .map(|(name, _)| name.as_str())
    }
}

fn parse_compound(token: &str) -> Result<CompoundSelector, TrackError> {
    let mut compound = CompoundSelector::default();
    let mut chars = token.chars().peekable();
    let mut buf = String::new();

    fn take_word(chars: &mut std::iter::Peekable<std::str::Chars>, buf: &mut String) {
        buf.clear();
        while let Some(c) = chars.peek() {
            if c.is_alphanumeric() || *c == '-' || *c == '_' {
                buf.push(*c);
                chars.next();
            }
            else {
                break;
            }
        }
    }

    // leading bare word is a tag name
    if matches!(chars.peek(), Some(c) if c.is_alphanumeric()) {
        take_word(&mut chars, &mut buf);
        compound.tag = Some(buf.to_lowercase());
    }

    while let Some(c) = chars.next() {
        match c {
            '#' => {
                take_word(&mut chars, &mut buf);
                if buf.is_empty() {
                    return Err(TrackError::new(format!("Dangling '#' in selector '{}'", token)));
                }
                compound.id = Some(buf.clone());
            }
            '.' => {
                take_word(&mut chars, &mut buf);
                if buf.is_empty() {
                    return Err(TrackError::new(format!("Dangling '.' in selector '{}'", token)));
                }
                compound.classes.push(buf.clone());
            }
            '[' => {
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }

                if !closed || inner.is_empty() {
                    return Err(TrackError::new(format!("Unclosed attribute in selector '{}'", token)));
                }

                match inner.split_once('=') {
                    Some((name, value)) => {
                        let value = value.trim_matches('"').trim_matches('\'').to_string();
                        compound.attributes.push((name.trim().to_string(), Some(value)));
                    }
                    None => {
                        compound.attributes.push((inner.trim().to_string(), None));
                    }
                }
            }
            _ => {
                return Err(TrackError::new(format!("Unexpected '{}' in selector '{}'", c, token)));
            }
        }
    }

    Ok(compound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dom() -> Dom {
        let snapshot: ElementSnapshot = serde_json::from_str(
            r#"{
                "tag": "div",
                "attributes": {"class": "card product-card", "data-sku": "SKU-42"},
                "children": [
                    {"tag": "span", "attributes": {"class": "title"}, "text": "Blue kettle"},
                    {
                        "tag": "div",
                        "attributes": {"class": "actions"},
                        "children": [
                            {"tag": "button", "attributes": {"id": "buy", "data-item-id": "42"}, "text": "Buy", "target": true},
                            {"tag": "input", "attributes": {"name": "qty"}, "value": "3"}
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();

        Dom::from_snapshot(&snapshot)
    }

    #[test]
    fn target_node_is_found() {
        let dom = sample_dom();
        let target = dom.target().unwrap();
        assert_eq!(dom.attribute(target, "id"), Some("buy"));
    }

    #[test]
    fn select_by_id_class_and_attribute() {
        let dom = sample_dom();
        let root = dom.root().unwrap();

        let by_id = Selector::parse("#buy").unwrap();
        assert!(dom.select_first(root, &by_id).is_some());

        let by_class = Selector::parse(".title").unwrap();
        let title = dom.select_first(root, &by_class).unwrap();
        assert_eq!(dom.readable_value(title).as_deref(), Some("Blue kettle"));

        let by_attr = Selector::parse("button[data-item-id]").unwrap();
        let button = dom.select_first(root, &by_attr).unwrap();
        assert_eq!(dom.attribute(button, "data-item-id"), Some("42"));
    }

    #[test]
    fn descendant_combinator_respects_scope() {
        let dom = sample_dom();
        let root = dom.root().unwrap();

        let selector = Selector::parse(".actions input").unwrap();
        let input = dom.select_first(root, &selector).unwrap();
        assert_eq!(dom.readable_value(input).as_deref(), Some("3"));

        // scoping to a sibling subtree must not see it
        let title_sel = Selector::parse(".title").unwrap();
        let title = dom.select_first(root, &title_sel).unwrap();
        assert!(dom.select_first(title, &selector).is_none());
    }

    #[test]
    fn closest_walks_up_from_the_target() {
        let dom = sample_dom();
        let target = dom.target().unwrap();

        let card = Selector::parse(".card").unwrap();
        let found = dom.closest(target, &card).unwrap();
        assert_eq!(dom.attribute(found, "data-sku"), Some("SKU-42"));

        let missing = Selector::parse(".nope").unwrap();
        assert!(dom.closest(target, &missing).is_none());
    }

    #[test]
    fn attribute_value_must_match_when_given() {
        let dom = sample_dom();
        let root = dom.root().unwrap();

        let matching = Selector::parse("[data-sku=SKU-42]").unwrap();
        assert!(dom.select_first(root, &matching).is_some());

        let wrong = Selector::parse("[data-sku=SKU-43]").unwrap();
        assert!(dom.select_first(root, &wrong).is_none());
    }

    #[test]
    fn trailing_attribute_is_exposed() {
        let selector = Selector::parse(".card [data-item-id]").unwrap();
        assert_eq!(selector.trailing_attribute(), Some("data-item-id"));

        let plain = Selector::parse("#buy").unwrap();
        assert_eq!(plain.trailing_attribute(), None);
    }

    #[test]
    fn malformed_selectors_are_rejected() {
        assert!(Selector::parse("").is_err());
        assert!(Selector::parse("[unclosed").is_err());
        assert!(Selector::parse("#").is_err());
    }
}
