//! Captured DOM tree.
//!
//! The capture script sends the page as a flat list of [`SnapshotNode`]s in
//! document order, each pointing at its parent by position. The indexer
//! rebuilds the tree from that list without recursing, so nesting depth is
//! not limited by the JSON parser or the stack.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn visible_by_default() -> bool {
    true
}

/// One entry of the capture payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SnapshotNode {
    Element {
        /// Position of the parent element in the list; `None` for `<body>`.
        #[serde(default)]
        parent: Option<usize>,
        tag: String,
        #[serde(default)]
        attributes: BTreeMap<String, String>,
        #[serde(default = "visible_by_default")]
        visible: bool,
        #[serde(default = "visible_by_default")]
        top: bool,
    },
    Text {
        #[serde(default)]
        parent: Option<usize>,
        text: String,
        #[serde(default = "visible_by_default")]
        visible: bool,
    },
}

impl SnapshotNode {
    fn parent(&self) -> Option<usize> {
        match self {
            SnapshotNode::Element { parent, .. } | SnapshotNode::Text { parent, .. } => *parent,
        }
    }
}

/// One node of a captured page.
#[derive(Debug, Clone, PartialEq)]
pub enum DomNode {
    Element(ElementNode),
    Text(TextNode),
}

impl DomNode {
    /// Visible text node.
    pub fn text(text: impl Into<String>) -> Self {
        DomNode::Text(TextNode {
            text: text.into(),
            visible: true,
        })
    }

    /// Rebuild the tree from a capture payload. The first node is the root;
    /// every other node must name an earlier element as its parent.
    pub fn from_snapshot(nodes: Vec<SnapshotNode>) -> Result<DomNode, String> {
        let mut is_element: Vec<bool> = Vec::with_capacity(nodes.len());
        let mut parents = Vec::with_capacity(nodes.len());
        let mut built = Vec::with_capacity(nodes.len());

        for (i, node) in nodes.into_iter().enumerate() {
            match (i, node.parent()) {
                (0, None) => {}
                (0, Some(_)) => return Err("snapshot root has a parent".into()),
                (_, None) => return Err(format!("node {} has no parent", i)),
                (_, Some(p)) if p >= i || !is_element[p] => {
                    return Err(format!("node {} has an invalid parent {}", i, p));
                }
                _ => {}
            }
            parents.push(node.parent());
            let dom = match node {
                SnapshotNode::Element {
                    tag,
                    attributes,
                    visible,
                    top,
                    ..
                } => {
                    is_element.push(true);
                    DomNode::Element(ElementNode {
                        tag,
                        attributes,
                        children: Vec::new(),
                        visible,
                        top,
                    })
                }
                SnapshotNode::Text { text, visible, .. } => {
                    is_element.push(false);
                    DomNode::Text(TextNode { text, visible })
                }
            };
            built.push(dom);
        }

        // Walking backwards, a node's descendants are all attached before it
        // is handed to its parent. Children arrive last-first.
        let mut children: Vec<Vec<DomNode>> = (0..built.len()).map(|_| Vec::new()).collect();
        while let Some(mut node) = built.pop() {
            let i = built.len();
            if let DomNode::Element(el) = &mut node {
                let mut kids = std::mem::take(&mut children[i]);
                kids.reverse();
                el.children = kids;
            }
            match parents[i] {
                Some(p) => children[p].push(node),
                None => return Ok(node),
            }
        }
        Err("empty snapshot".into())
    }

    /// Flatten into capture-payload order.
    pub fn to_snapshot(&self) -> Vec<SnapshotNode> {
        let mut out = Vec::new();
        let mut stack: Vec<(&DomNode, Option<usize>)> = vec![(self, None)];
        while let Some((node, parent)) = stack.pop() {
            let position = out.len();
            match node {
                DomNode::Element(el) => {
                    out.push(SnapshotNode::Element {
                        parent,
                        tag: el.tag.clone(),
                        attributes: el.attributes.clone(),
                        visible: el.visible,
                        top: el.top,
                    });
                    stack.extend(el.children.iter().rev().map(|c| (c, Some(position))));
                }
                DomNode::Text(t) => out.push(SnapshotNode::Text {
                    parent,
                    text: t.text.clone(),
                    visible: t.visible,
                }),
            }
        }
        out
    }

    /// The capture payload for this tree, as the page script would send it.
    pub fn to_markup(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_snapshot())
    }
}

impl From<ElementNode> for DomNode {
    fn from(el: ElementNode) -> Self {
        DomNode::Element(el)
    }
}

/// An element with its attributes and the layout flags computed in the page.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementNode {
    /// Lowercase tag name.
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<DomNode>,
    /// Has a non-empty box and is not hidden by CSS.
    pub visible: bool,
    /// Not covered by another element at its sample points.
    pub top: bool,
}

// Iterative, so a very deep page does not overflow the stack on drop.
impl Drop for ElementNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(node) = pending.pop() {
            if let DomNode::Element(mut el) = node {
                pending.append(&mut el.children);
            }
        }
    }
}

impl ElementNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
            visible: true,
            top: true,
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn child(mut self, node: impl Into<DomNode>) -> Self {
        self.children.push(node.into());
        self
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.child(DomNode::text(text))
    }

    /// Mark as not rendered (display:none, zero size, ...).
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Mark as covered by another element.
    pub fn covered(mut self) -> Self {
        self.top = false;
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }
}

/// A run of character data.
#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    pub text: String,
    pub visible: bool,
}
