//! Element indexing: captured DOM tree → numbered selector map + text tree.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::node::{DomNode, ElementNode, SnapshotNode};
use crate::config::IndexerSettings;
use crate::error::StepError;

/// Subtrees the indexer never enters.
const DENIED_TAGS: &[&str] = &["svg", "iframe", "script", "style", "link", "meta"];

const INTERACTIVE_TAGS: &[&str] = &[
    "a", "button", "details", "embed", "input", "label", "menu", "menuitem", "object", "select",
    "textarea", "summary",
];

const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "menu",
    "menuitem",
    "link",
    "checkbox",
    "radio",
    "slider",
    "tab",
    "tabpanel",
    "textbox",
    "combobox",
    "grid",
    "listbox",
    "option",
    "progressbar",
    "scrollbar",
    "searchbox",
    "switch",
    "tree",
    "treeitem",
    "spinbutton",
    "tooltip",
    "menuitemcheckbox",
    "menuitemradio",
];

/// Attributes shown to the model, in this order.
const ESSENTIAL_ATTRIBUTES: &[&str] = &[
    "id",
    "class",
    "href",
    "src",
    "readonly",
    "disabled",
    "checked",
    "selected",
    "role",
    "type",
    "name",
    "value",
    "placeholder",
    "title",
    "alt",
    "for",
    "autocomplete",
];

/// Attribute values that are never shortened.
const UNCAPPED_ATTRIBUTES: &[&str] = &["href", "src", "action"];

/// Decides which elements get an index.
pub trait ElementPredicates: Send + Sync {
    /// `false` drops the element and its whole subtree.
    fn is_accepted(&self, el: &ElementNode) -> bool;
    /// Clickable, focusable or text-input-capable.
    fn is_interactive(&self, el: &ElementNode) -> bool;
    /// Not disabled or hidden by attribute.
    fn is_active(&self, el: &ElementNode) -> bool;
}

/// Tag, role and attribute rules for ordinary HTML pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPredicates;

impl ElementPredicates for DefaultPredicates {
    fn is_accepted(&self, el: &ElementNode) -> bool {
        !DENIED_TAGS.contains(&el.tag.as_str())
    }

    fn is_interactive(&self, el: &ElementNode) -> bool {
        if INTERACTIVE_TAGS.contains(&el.tag.as_str()) {
            return true;
        }
        let role = el.get("role").or_else(|| el.get("aria-role"));
        if role.is_some_and(|r| INTERACTIVE_ROLES.contains(&r)) {
            return true;
        }
        el.get("tabindex") == Some("0")
    }

    fn is_active(&self, el: &ElementNode) -> bool {
        !el.has("disabled") && !el.has("hidden") && el.get("aria-disabled") != Some("true")
    }
}

/// One actionable element of a snapshot.
///
/// `index` is only meaningful for the snapshot that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveElement {
    pub index: usize,
    /// Absolute XPath, re-resolved right before each interaction.
    pub locator: String,
    /// `<tag attrs>text</tag>` as shown to the model.
    pub tag_summary: String,
    /// Nesting level below `<body>`.
    pub depth: usize,
}

impl fmt::Display for InteractiveElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.index, self.tag_summary)
    }
}

/// Index → element for one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorMap(BTreeMap<usize, InteractiveElement>);

impl SelectorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, element: InteractiveElement) {
        self.0.insert(element.index, element);
    }

    pub fn get(&self, index: usize) -> Option<&InteractiveElement> {
        self.0.get(&index)
    }

    pub fn locator(&self, index: usize) -> Option<&str> {
        self.0.get(&index).map(|e| e.locator.as_str())
    }

    pub fn contains(&self, index: usize) -> bool {
        self.0.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Elements in index order.
    pub fn iter(&self) -> impl Iterator<Item = &InteractiveElement> {
        self.0.values()
    }
}

impl FromIterator<InteractiveElement> for SelectorMap {
    fn from_iter<I: IntoIterator<Item = InteractiveElement>>(iter: I) -> Self {
        let mut map = SelectorMap::new();
        for el in iter {
            map.insert(el);
        }
        map
    }
}

/// A line of the rendered tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomItem {
    Element {
        index: usize,
        summary: String,
        depth: usize,
    },
    Text {
        text: String,
        depth: usize,
    },
}

/// Output of one indexing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedPage {
    pub items: Vec<DomItem>,
    pub selector_map: SelectorMap,
}

impl IndexedPage {
    /// Line-oriented tree the model reads:
    ///
    /// ```text
    /// 0[:]\t<a href="/">Home</a>
    /// _[:]\t\tSome paragraph
    /// ```
    pub fn render(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            match item {
                DomItem::Element {
                    index,
                    summary,
                    depth,
                } => {
                    out.push_str(&index.to_string());
                    out.push_str("[:]");
                    push_indent(&mut out, *depth);
                    out.push_str(summary);
                }
                DomItem::Text { text, depth } => {
                    out.push_str("_[:]");
                    push_indent(&mut out, *depth);
                    out.push_str(text);
                }
            }
            out.push('\n');
        }
        out
    }
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
}

/// Turns captured markup into an [`IndexedPage`].
#[derive(Clone)]
pub struct ElementIndexer {
    predicates: Arc<dyn ElementPredicates>,
    max_text_length: usize,
    max_attribute_length: usize,
}

impl Default for ElementIndexer {
    fn default() -> Self {
        Self::new(&IndexerSettings::default())
    }
}

impl fmt::Debug for ElementIndexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementIndexer")
            .field("max_text_length", &self.max_text_length)
            .field("max_attribute_length", &self.max_attribute_length)
            .finish_non_exhaustive()
    }
}

struct Walk {
    items: Vec<DomItem>,
    selector_map: SelectorMap,
    next_index: usize,
}

impl ElementIndexer {
    pub fn new(settings: &IndexerSettings) -> Self {
        Self {
            predicates: Arc::new(DefaultPredicates),
            max_text_length: settings.max_text_length,
            max_attribute_length: settings.max_attribute_length,
        }
    }

    /// Swap in different interactivity rules.
    pub fn with_predicates(mut self, predicates: impl ElementPredicates + 'static) -> Self {
        self.predicates = Arc::new(predicates);
        self
    }

    /// Index a capture payload (see [`SnapshotNode`]) rooted at `<body>`.
    pub fn index(&self, markup: &str) -> Result<IndexedPage, StepError> {
        let unreadable = |e: String| StepError::StateCapture(format!("unreadable page snapshot: {}", e));
        let nodes: Vec<SnapshotNode> =
            serde_json::from_str(markup).map_err(|e| unreadable(e.to_string()))?;
        let root = DomNode::from_snapshot(nodes).map_err(unreadable)?;
        Ok(self.index_tree(&root))
    }

    pub fn index_tree(&self, root: &DomNode) -> IndexedPage {
        let mut walk = Walk {
            items: Vec::new(),
            selector_map: SelectorMap::new(),
            next_index: 0,
        };

        match root {
            DomNode::Element(body) => {
                let base = format!("/html/{}", body.tag);
                self.walk_children(body, base, &mut walk);
            }
            DomNode::Text(t) => {
                let text = collapse_whitespace(&t.text);
                if t.visible && !text.is_empty() {
                    walk.items.push(DomItem::Text {
                        text: cap_text(&text, self.max_text_length),
                        depth: 0,
                    });
                }
            }
        }

        IndexedPage {
            items: walk.items,
            selector_map: walk.selector_map,
        }
    }

    /// Depth-first, in document order, with an explicit stack.
    fn walk_children(&self, body: &ElementNode, base: String, walk: &mut Walk) {
        let mut stack = vec![Frame::new(body, base, 0, false)];

        while let Some(frame) = stack.last_mut() {
            let Some(child) = frame.children.next() else {
                stack.pop();
                continue;
            };

            match child {
                DomNode::Element(el) => {
                    // XPath positions count every same-tag sibling, denied ones included.
                    let position = frame.positions.entry(el.tag.as_str()).or_insert(0);
                    *position += 1;
                    if !self.predicates.is_accepted(el) {
                        continue;
                    }

                    let path = format!("{}/{}[{}]", frame.path, el.tag, position);
                    let child_depth = frame.depth + 1;
                    let inside_indexed = frame.inside_indexed;
                    let indexed = el.visible
                        && el.top
                        && self.predicates.is_interactive(el)
                        && self.predicates.is_active(el);

                    if indexed {
                        let index = walk.next_index;
                        walk.next_index += 1;
                        let summary = self.summarize(el);
                        walk.items.push(DomItem::Element {
                            index,
                            summary: summary.clone(),
                            depth: child_depth,
                        });
                        walk.selector_map.insert(InteractiveElement {
                            index,
                            locator: path.clone(),
                            tag_summary: summary,
                            depth: child_depth,
                        });
                    }

                    stack.push(Frame::new(el, path, child_depth, inside_indexed || indexed));
                }
                DomNode::Text(t) => {
                    if frame.inside_indexed || !t.visible || !frame.visible {
                        continue;
                    }
                    let text = collapse_whitespace(&t.text);
                    if text.is_empty() {
                        continue;
                    }
                    walk.items.push(DomItem::Text {
                        text: cap_text(&text, self.max_text_length),
                        depth: frame.depth,
                    });
                }
            }
        }
    }

    fn summarize(&self, el: &ElementNode) -> String {
        let mut out = format!("<{}", el.tag);

        for name in ESSENTIAL_ATTRIBUTES {
            if let Some(value) = el.get(name) {
                self.push_attribute(&mut out, name, value);
            }
        }
        for (name, value) in &el.attributes {
            if name.starts_with("aria-") || name.starts_with("data-") {
                out.push_str(&format!(" {}=\"{}\"", name, value));
            }
        }

        let mut parts = Vec::new();
        self.collect_text(el, &mut parts);
        let text = cap_text(&parts.join(" "), self.max_text_length);

        out.push('>');
        out.push_str(&text);
        out.push_str(&format!("</{}>", el.tag));
        out
    }

    fn push_attribute(&self, out: &mut String, name: &str, value: &str) {
        let value = if UNCAPPED_ATTRIBUTES.contains(&name) {
            value.to_string()
        } else {
            cap_text(value, self.max_attribute_length)
        };
        out.push_str(&format!(" {}=\"{}\"", name, value));
    }

    fn collect_text(&self, el: &ElementNode, parts: &mut Vec<String>) {
        let mut stack = vec![el.children.iter()];
        while let Some(children) = stack.last_mut() {
            match children.next() {
                None => {
                    stack.pop();
                }
                Some(DomNode::Element(inner)) => {
                    if self.predicates.is_accepted(inner) {
                        stack.push(inner.children.iter());
                    }
                }
                Some(DomNode::Text(t)) if t.visible => {
                    let text = collapse_whitespace(&t.text);
                    if !text.is_empty() {
                        parts.push(text);
                    }
                }
                Some(DomNode::Text(_)) => {}
            }
        }
    }
}

/// One open element of the walk.
struct Frame<'a> {
    children: std::slice::Iter<'a, DomNode>,
    positions: HashMap<&'a str, usize>,
    path: String,
    depth: usize,
    visible: bool,
    inside_indexed: bool,
}

impl<'a> Frame<'a> {
    fn new(el: &'a ElementNode, path: String, depth: usize, inside_indexed: bool) -> Self {
        Self {
            children: el.children.iter(),
            positions: HashMap::new(),
            path,
            depth,
            visible: el.visible,
            inside_indexed,
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Middle-truncate to `max` characters: `head...tail`.
pub(crate) fn cap_text(text: &str, max: usize) -> String {
    let len = text.chars().count();
    if len <= max {
        return text.to_string();
    }
    let half = max / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().skip(len - half).collect();
    format!("{}...{}", head, tail)
}
