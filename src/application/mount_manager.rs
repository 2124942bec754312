//! Annotation mount bookkeeping
//!
//! Owns the mapping entry node -> mounted annotation for one watcher and
//! keeps it in step with each pass's resolved entries. Reconciliation is
//! idempotent: applying the same resolved set twice performs no DOM work.

#![allow(clippy::uninlined_format_args)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use scraper::Selector;
use tracing::{debug, info, trace};

use crate::domain::{AnchorPoint, AnchorUnavailable, CatalogRecord, Entry, InsertPosition, LiveDocument};
use crate::infrastructure::config::{AnchorPosition, AnchorScope, AnnotationConfig};
use crate::utils::escape_html;

/// Chooses where an entry's annotation is inserted
///
/// Must be safe to call repeatedly and return `None` while the host's
/// structure is momentarily inconsistent.
pub trait AnchorPolicy<D: LiveDocument> {
    fn anchor_for(&self, doc: &D, entry: D::Node) -> Option<AnchorPoint<D::Node>>;
}

/// Produces the self-contained annotation markup for a record
pub trait AnnotationFactory {
    fn markup(&self, record: &CatalogRecord) -> String;
}

/// Anchor found by selector, relative to the entry or the whole document
#[derive(Debug, Clone)]
pub struct SelectorAnchorPolicy {
    selector: Option<Selector>,
    scope: AnchorScope,
    position: AnchorPosition,
    child_index: usize,
}

impl SelectorAnchorPolicy {
    pub const fn new(
        selector: Option<Selector>,
        scope: AnchorScope,
        position: AnchorPosition,
        child_index: usize,
    ) -> Self {
        Self {
            selector,
            scope,
            position,
            child_index,
        }
    }

    /// Append to the entry node itself
    pub const fn entry_itself() -> Self {
        Self::new(None, AnchorScope::Entry, AnchorPosition::Append, 0)
    }
}

impl<D: LiveDocument> AnchorPolicy<D> for SelectorAnchorPolicy {
    fn anchor_for(&self, doc: &D, entry: D::Node) -> Option<AnchorPoint<D::Node>> {
        if !doc.is_connected(entry) {
            return None;
        }
        let parent = match (&self.selector, self.scope) {
            (None, _) => entry,
            (Some(selector), AnchorScope::Entry) => doc.select_within(entry, selector).into_iter().next()?,
            (Some(selector), AnchorScope::Document) => doc.select_first(selector)?,
        };
        let position = match self.position {
            AnchorPosition::Append => InsertPosition::Append,
            AnchorPosition::Prepend => InsertPosition::Prepend,
            AnchorPosition::BeforeChild => doc
                .children(parent)
                .get(self.child_index)
                .copied()
                .map_or(InsertPosition::Append, InsertPosition::Before),
        };
        Some(AnchorPoint { parent, position })
    }
}

/// Outbound link carrying the catalog logo
#[derive(Debug, Clone)]
pub struct LinkAnnotationFactory {
    css_class: String,
    logo_src: String,
    logo_alt: String,
}

impl LinkAnnotationFactory {
    pub fn from_config(config: &AnnotationConfig) -> Self {
        Self {
            css_class: config.css_class.clone(),
            logo_src: config.logo_src.clone(),
            logo_alt: config.logo_alt.clone(),
        }
    }
}

impl Default for LinkAnnotationFactory {
    fn default() -> Self {
        Self::from_config(&AnnotationConfig::default())
    }
}

impl AnnotationFactory for LinkAnnotationFactory {
    fn markup(&self, record: &CatalogRecord) -> String {
        format!(
            r#"<a class="{}" href="{}" title="{}" target="_blank" rel="noopener noreferrer" data-catalog-id="{}"><img src="{}" alt="{}" width="20" height="20"></a>"#,
            escape_html(&self.css_class),
            escape_html(&record.site_url),
            escape_html(&record.display_title()),
            record.id,
            escape_html(&self.logo_src),
            escape_html(&self.logo_alt),
        )
    }
}

/// One live annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedAnnotation<N> {
    pub record_id: u64,
    pub element: N,
}

/// What one reconciliation changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub mounted: usize,
    pub unmounted: usize,
    pub retained: usize,
    pub anchor_unavailable: usize,
}

impl ReconcileReport {
    /// No mount or unmount happened
    pub const fn is_noop(&self) -> bool {
        self.mounted == 0 && self.unmounted == 0
    }
}

/// Mount bookkeeping for one watcher
pub struct MountManager<D: LiveDocument> {
    anchors: Arc<dyn AnchorPolicy<D>>,
    factory: Arc<dyn AnnotationFactory>,
    mounted: HashMap<D::Node, MountedAnnotation<D::Node>>,
    /// Our inserted/removed elements whose mutation records were not seen yet
    own_nodes: HashMap<D::Node, usize>,
}

impl<D: LiveDocument> MountManager<D> {
    pub fn new(anchors: Arc<dyn AnchorPolicy<D>>, factory: Arc<dyn AnnotationFactory>) -> Self {
        Self {
            anchors,
            factory,
            mounted: HashMap::new(),
            own_nodes: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.mounted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounted.is_empty()
    }

    pub fn get(&self, entry: D::Node) -> Option<&MountedAnnotation<D::Node>> {
        self.mounted.get(&entry)
    }

    pub fn mounted(&self) -> impl Iterator<Item = (&D::Node, &MountedAnnotation<D::Node>)> {
        self.mounted.iter()
    }

    /// Whether `node` has an own insertion or removal not yet acknowledged
    pub fn is_own_node(&self, node: D::Node) -> bool {
        self.own_nodes.contains_key(&node)
    }

    /// Consume one pending own mutation for each of `nodes`
    ///
    /// Returns false and consumes nothing unless every node has one. Each
    /// own mutation is acknowledged once, so a later host removal of the
    /// same annotation is not mistaken for ours.
    pub fn acknowledge_own(&mut self, nodes: &[D::Node]) -> bool {
        if nodes.is_empty() || !nodes.iter().all(|node| self.own_nodes.contains_key(node)) {
            return false;
        }
        for node in nodes {
            if let Some(count) = self.own_nodes.get_mut(node) {
                *count -= 1;
                if *count == 0 {
                    self.own_nodes.remove(node);
                }
            }
        }
        true
    }

    /// Drop every pending own mutation
    pub fn forget_own_mutations(&mut self) {
        self.own_nodes.clear();
    }

    fn note_own(&mut self, node: D::Node) {
        *self.own_nodes.entry(node).or_insert(0) += 1;
    }

    /// Bring the mounted set in line with `resolved`
    ///
    /// Mounts every resolved entry that has no annotation yet (skipping those
    /// without an anchor point), and removes annotations whose entry is no
    /// longer resolved or no longer attached. An annotation whose element was
    /// detached by the host, or that links a different record than this pass
    /// resolved, is mounted again.
    pub fn reconcile(
        &mut self,
        doc: &D,
        resolved: &[(Entry<D::Node>, Arc<CatalogRecord>)],
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let wanted: HashSet<D::Node> = resolved
            .iter()
            .map(|(entry, _)| entry.node)
            .filter(|node| doc.is_connected(*node))
            .collect();

        let stale: Vec<D::Node> = self
            .mounted
            .keys()
            .filter(|node| !wanted.contains(node))
            .copied()
            .collect();
        for node in stale {
            if let Some(annotation) = self.mounted.remove(&node) {
                self.unmount(doc, &annotation);
                report.unmounted += 1;
            }
        }

        for (entry, record) in resolved {
            if !wanted.contains(&entry.node) {
                continue;
            }
            if let Some(existing) = self.mounted.get(&entry.node).cloned() {
                let attached = doc.is_connected(existing.element);
                if attached && existing.record_id == record.id {
                    report.retained += 1;
                    continue;
                }
                self.mounted.remove(&entry.node);
                if attached {
                    trace!(
                        "{} now resolves to record {} instead of {}; replacing",
                        entry, record.id, existing.record_id
                    );
                    self.unmount(doc, &existing);
                    report.unmounted += 1;
                } else {
                    trace!("Annotation for {} was detached by the host; re-mounting", entry);
                }
            }
            match self.mount(doc, entry, record) {
                Ok(annotation) => {
                    self.mounted.insert(entry.node, annotation);
                    report.mounted += 1;
                }
                Err(unavailable) => {
                    debug!("{}; will retry on the next pass", unavailable);
                    report.anchor_unavailable += 1;
                }
            }
        }

        debug!(
            "Reconciled: +{} -{} ={} (no anchor: {})",
            report.mounted, report.unmounted, report.retained, report.anchor_unavailable
        );
        report
    }

    /// Remove every annotation and clear the mapping
    pub fn teardown_all(&mut self, doc: &D) -> usize {
        let removed: Vec<MountedAnnotation<D::Node>> = self.mounted.drain().map(|(_, m)| m).collect();
        for annotation in &removed {
            self.unmount(doc, annotation);
        }
        if !removed.is_empty() {
            info!("🧹 Tore down {} annotation(s)", removed.len());
        }
        removed.len()
    }

    fn mount(
        &mut self,
        doc: &D,
        entry: &Entry<D::Node>,
        record: &CatalogRecord,
    ) -> Result<MountedAnnotation<D::Node>, AnchorUnavailable> {
        let unavailable = || AnchorUnavailable {
            entry_text: entry.text.clone(),
        };
        let anchor = self.anchors.anchor_for(doc, entry.node).ok_or_else(unavailable)?;
        let markup = self.factory.markup(record);
        let element = doc.insert_markup(&anchor, &markup).ok_or_else(unavailable)?;
        self.note_own(element);
        trace!("Mounted annotation {:?} for {} -> {}", element, entry, record.site_url);
        Ok(MountedAnnotation {
            record_id: record.id,
            element,
        })
    }

    fn unmount(&mut self, doc: &D, annotation: &MountedAnnotation<D::Node>) {
        // Only a removal that emitted a record will be acknowledged
        if doc.remove(annotation.element) {
            self.note_own(annotation.element);
        }
    }
}
