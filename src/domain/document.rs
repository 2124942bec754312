//! Port to the live, externally-controlled document
//!
//! The host page owns the tree and re-renders it at will; the engine only
//! reads it, subscribes to its structural mutations, and inserts or removes
//! its own annotation elements.

use std::fmt::Debug;
use std::hash::Hash;

use scraper::Selector;
use tokio::sync::broadcast;

use super::errors::ObserverSetupFailure;

/// One structural change: `added` and `removed` are children of `target`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord<N> {
    pub target: N,
    pub added: Vec<N>,
    pub removed: Vec<N>,
}

impl<N> MutationRecord<N> {
    pub fn added(target: N, added: Vec<N>) -> Self {
        Self {
            target,
            added,
            removed: Vec::new(),
        }
    }

    pub fn removed(target: N, removed: Vec<N>) -> Self {
        Self {
            target,
            added: Vec::new(),
            removed,
        }
    }

    /// Character-data style change on `target` itself
    pub fn content(target: N) -> Self {
        Self {
            target,
            added: Vec::new(),
            removed: Vec::new(),
        }
    }
}

/// Mutation records delivered together
pub type MutationBatch<N> = Vec<MutationRecord<N>>;

/// Where an annotation goes relative to its parent's child list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition<N> {
    Append,
    Prepend,
    Before(N),
}

/// Insertion point resolved by an anchor policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorPoint<N> {
    pub parent: N,
    pub position: InsertPosition<N>,
}

impl<N> AnchorPoint<N> {
    pub const fn append_to(parent: N) -> Self {
        Self {
            parent,
            position: InsertPosition::Append,
        }
    }
}

/// A continuously-mutated document the engine can observe and annotate.
///
/// Implementations are cheap handles (`Clone`) onto one shared tree. All
/// reads reflect the tree at call time; node handles stay valid while the
/// node is attached and are never reused for a different node.
pub trait LiveDocument: Clone + 'static {
    type Node: Copy + Eq + Hash + Debug + 'static;

    /// Subscribe to structural mutation batches
    fn observe(&self) -> Result<broadcast::Receiver<MutationBatch<Self::Node>>, ObserverSetupFailure>;

    /// First attached element matching `selector`, in document order
    fn select_first(&self, selector: &Selector) -> Option<Self::Node>;

    /// Descendants of `scope` matching `selector`, in document order
    fn select_within(&self, scope: Self::Node, selector: &Selector) -> Vec<Self::Node>;

    /// Concatenated descendant text, `None` for unknown nodes
    fn text_content(&self, node: Self::Node) -> Option<String>;

    /// All child nodes, text nodes included
    fn children(&self, node: Self::Node) -> Vec<Self::Node>;

    fn is_connected(&self, node: Self::Node) -> bool;

    /// Inclusive: a node contains itself
    fn contains(&self, ancestor: Self::Node, node: Self::Node) -> bool;

    /// Parse `markup` and insert it at `anchor`, returning the first inserted element
    fn insert_markup(&self, anchor: &AnchorPoint<Self::Node>, markup: &str) -> Option<Self::Node>;

    /// Detach `node` from its parent
    ///
    /// Returns false, and emits no mutation record, when `node` is unknown or
    /// has no parent.
    fn remove(&self, node: Self::Node) -> bool;
}
