//! Element indexing.
//!
//! The page is captured in-browser as a flat JSON node list
//! ([`SnapshotNode`]), rebuilt into a [`DomNode`] tree, then walked here to
//! number every interactive element and render the text tree the model
//! reads. Indices are valid for one snapshot only; every capture builds
//! a fresh [`SelectorMap`].

mod indexer;
mod node;

pub use indexer::{
    DefaultPredicates, DomItem, ElementIndexer, ElementPredicates, IndexedPage,
    InteractiveElement, SelectorMap,
};
pub use node::{DomNode, ElementNode, SnapshotNode, TextNode};
