//! In-process live document backed by a `scraper` tree
//!
//! The host side (a page driver, a replay tool, or a test) mutates the tree
//! through the methods on [`MemoryDocument`]; every structural change is
//! published to observers as one mutation batch, the way a browser's
//! mutation observer would deliver it.

#![allow(clippy::uninlined_format_args)]

use std::cell::RefCell;
use std::rc::Rc;

use ego_tree::{NodeId, NodeRef, Tree};
use scraper::{ElementRef, Html, Node, Selector};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::domain::{
    AnchorPoint, InsertPosition, LiveDocument, MutationBatch, MutationRecord, ObserverSetupFailure,
};
use crate::utils::escape_html;

/// Mutation batches buffered per observer before it starts lagging
pub const DEFAULT_MUTATION_CAPACITY: usize = 256;

/// Shared handle onto one mutable HTML tree
#[derive(Clone)]
pub struct MemoryDocument {
    inner: Rc<Inner>,
}

struct Inner {
    html: RefCell<Html>,
    mutations: RefCell<Option<broadcast::Sender<MutationBatch<NodeId>>>>,
    refusal: RefCell<Option<String>>,
}

impl MemoryDocument {
    /// Parse a full HTML document
    pub fn parse(markup: &str) -> Self {
        Self::with_capacity(markup, DEFAULT_MUTATION_CAPACITY)
    }

    pub fn with_capacity(markup: &str, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Rc::new(Inner {
                html: RefCell::new(Html::parse_document(markup)),
                mutations: RefCell::new(Some(sender)),
                refusal: RefCell::new(None),
            }),
        }
    }

    /// First attached element matching a CSS selector string
    pub fn query(&self, css: &str) -> Option<NodeId> {
        let selector = Selector::parse(css).ok()?;
        self.select_first(&selector)
    }

    /// The `<body>` element
    pub fn body(&self) -> Option<NodeId> {
        self.query("body")
    }

    /// Parse `markup` and append it to `parent`, returning the inserted top-level nodes
    pub fn append_html(&self, parent: NodeId, markup: &str) -> Vec<NodeId> {
        let inserted = {
            let mut html = self.inner.html.borrow_mut();
            graft(&mut html.tree, parent, InsertPosition::Append, markup)
        };
        if !inserted.is_empty() {
            self.emit(vec![MutationRecord::added(parent, inserted.clone())]);
        }
        inserted
    }

    /// Replace every child of `parent` with the parsed `markup` in one batch
    pub fn replace_children(&self, parent: NodeId, markup: &str) -> Vec<NodeId> {
        let (removed, added) = {
            let mut html = self.inner.html.borrow_mut();
            let removed = detach_children(&mut html.tree, parent);
            let added = graft(&mut html.tree, parent, InsertPosition::Append, markup);
            (removed, added)
        };
        if !removed.is_empty() || !added.is_empty() {
            self.emit(vec![MutationRecord {
                target: parent,
                added: added.clone(),
                removed,
            }]);
        }
        added
    }

    /// Replace the text of `node`
    pub fn set_text(&self, node: NodeId, text: &str) {
        self.replace_children(node, &escape_html(text));
    }

    /// Serialized markup of an element, `None` for unknown or non-element nodes
    pub fn outer_html(&self, node: NodeId) -> Option<String> {
        let html = self.inner.html.borrow();
        html.tree.get(node).and_then(ElementRef::wrap).map(|e| e.html())
    }

    /// Count attached elements matching a CSS selector string
    pub fn count(&self, css: &str) -> usize {
        let Ok(selector) = Selector::parse(css) else {
            return 0;
        };
        let html = self.inner.html.borrow();
        html.root_element().select(&selector).count()
    }

    /// Simulate page unload: observers see their channel close
    pub fn close(&self) {
        if self.inner.mutations.borrow_mut().take().is_some() {
            debug!("MemoryDocument closed; mutation channel dropped");
        }
    }

    /// Make every later `observe()` call fail
    pub fn refuse_observers(&self, reason: &str) {
        *self.inner.refusal.borrow_mut() = Some(reason.to_string());
    }

    /// Number of live mutation subscriptions
    pub fn observer_count(&self) -> usize {
        self.inner
            .mutations
            .borrow()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn emit(&self, batch: MutationBatch<NodeId>) {
        trace!("Emitting mutation batch with {} record(s)", batch.len());
        if let Some(sender) = self.inner.mutations.borrow().as_ref() {
            // No receivers is not an error: nobody is watching yet
            let _ = sender.send(batch);
        }
    }
}

impl LiveDocument for MemoryDocument {
    type Node = NodeId;

    fn observe(&self) -> Result<broadcast::Receiver<MutationBatch<NodeId>>, ObserverSetupFailure> {
        if let Some(reason) = self.inner.refusal.borrow().as_ref() {
            return Err(ObserverSetupFailure::Refused {
                reason: reason.clone(),
            });
        }
        self.inner
            .mutations
            .borrow()
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or(ObserverSetupFailure::DocumentClosed)
    }

    fn select_first(&self, selector: &Selector) -> Option<NodeId> {
        let html = self.inner.html.borrow();
        let found = html.root_element().select(selector).next().map(|e| e.id());
        found
    }

    fn select_within(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        let html = self.inner.html.borrow();
        html.tree
            .get(scope)
            .and_then(ElementRef::wrap)
            .map(|element| element.select(selector).map(|e| e.id()).collect())
            .unwrap_or_default()
    }

    fn text_content(&self, node: NodeId) -> Option<String> {
        let html = self.inner.html.borrow();
        let node = html.tree.get(node)?;
        Some(
            node.descendants()
                .filter_map(|n| n.value().as_text())
                .map(|t| &**t)
                .collect(),
        )
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        let html = self.inner.html.borrow();
        html.tree
            .get(node)
            .map(|n| n.children().map(|c| c.id()).collect())
            .unwrap_or_default()
    }

    fn is_connected(&self, node: NodeId) -> bool {
        let html = self.inner.html.borrow();
        is_attached(&html.tree, node)
    }

    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        if ancestor == node {
            return true;
        }
        let html = self.inner.html.borrow();
        html.tree
            .get(node)
            .is_some_and(|n| n.ancestors().any(|a| a.id() == ancestor))
    }

    fn insert_markup(&self, anchor: &AnchorPoint<NodeId>, markup: &str) -> Option<NodeId> {
        let inserted = {
            let mut html = self.inner.html.borrow_mut();
            if !is_attached(&html.tree, anchor.parent) {
                return None;
            }
            graft(&mut html.tree, anchor.parent, anchor.position, markup)
        };
        if inserted.is_empty() {
            return None;
        }
        let first_element = {
            let html = self.inner.html.borrow();
            inserted
                .iter()
                .copied()
                .find(|id| html.tree.get(*id).is_some_and(|n| n.value().is_element()))
        };
        self.emit(vec![MutationRecord::added(anchor.parent, inserted)]);
        first_element
    }

    fn remove(&self, node: NodeId) -> bool {
        let parent = {
            let mut html = self.inner.html.borrow_mut();
            let Some(mut target) = html.tree.get_mut(node) else {
                return false;
            };
            let Some(parent) = target.parent().map(|p| p.id()) else {
                return false;
            };
            target.detach();
            parent
        };
        self.emit(vec![MutationRecord::removed(parent, vec![node])]);
        true
    }
}

fn is_attached(tree: &Tree<Node>, node: NodeId) -> bool {
    let root = tree.root().id();
    tree.get(node)
        .is_some_and(|n| n.id() == root || n.ancestors().any(|a| a.id() == root))
}

fn detach_children(tree: &mut Tree<Node>, parent: NodeId) -> Vec<NodeId> {
    let children: Vec<NodeId> = tree
        .get(parent)
        .map(|n| n.children().map(|c| c.id()).collect())
        .unwrap_or_default();
    for child in &children {
        if let Some(mut node) = tree.get_mut(*child) {
            node.detach();
        }
    }
    children
}

/// Parse `markup` as a fragment and copy its top-level nodes into `tree`
fn graft(
    tree: &mut Tree<Node>,
    parent: NodeId,
    position: InsertPosition<NodeId>,
    markup: &str,
) -> Vec<NodeId> {
    let fragment = Html::parse_fragment(markup);
    let fragment_root = fragment.root_element();

    // Prepending several nodes one by one would reverse them; insert them all
    // before the current first child instead.
    let position = match position {
        InsertPosition::Prepend => tree
            .get(parent)
            .and_then(|p| p.first_child().map(|c| c.id()))
            .map_or(InsertPosition::Append, InsertPosition::Before),
        other => other,
    };

    let mut inserted = Vec::new();
    for source in fragment_root.children() {
        let value = source.value().clone();
        let id = match position {
            InsertPosition::Before(reference) => {
                let Some(mut reference) = tree.get_mut(reference) else {
                    break;
                };
                reference.insert_before(value).id()
            }
            InsertPosition::Append | InsertPosition::Prepend => {
                let Some(mut parent) = tree.get_mut(parent) else {
                    break;
                };
                parent.append(value).id()
            }
        };
        copy_children(tree, id, source);
        inserted.push(id);
    }
    inserted
}

fn copy_children(tree: &mut Tree<Node>, dest: NodeId, source: NodeRef<'_, Node>) {
    for child in source.children() {
        let id = {
            let Some(mut dest_node) = tree.get_mut(dest) else {
                return;
            };
            dest_node.append(child.value().clone()).id()
        };
        copy_children(tree, id, child);
    }
}
