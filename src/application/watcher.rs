//! Live-region watcher: the reconciliation loop
//!
//! Observes document mutations, tracks the appearance, replacement and
//! disappearance of one container, and drives extract -> resolve -> reconcile
//! passes against it.
//!
//! States: `Idle` (no container) and `Tracking` (container present). Every
//! `Idle -> Tracking` transition opens a new generation; a pass only applies
//! its result while its generation is still current, the watcher is not
//! stopped, and its container is still attached. That keeps late lookup
//! completions from mounting anything after a teardown.
//!
//! The loop runs as a `spawn_local` task: everything happens on one thread,
//! and shared state is never borrowed across an await.

#![allow(clippy::uninlined_format_args)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use futures::future::join_all;
use scraper::Selector;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::extractor::EntryExtractor;
use super::mount_manager::{AnchorPolicy, AnnotationFactory, MountManager, ReconcileReport};
use super::resolver::MetadataResolver;
use crate::domain::{CatalogRecord, Entry, LiveDocument, MutationBatch, ObserverSetupFailure, WatcherId};
use crate::infrastructure::config::{PassOrdering, WatcherConfig};

/// What to watch and how to annotate it
pub struct WatchProfile<D: LiveDocument> {
    pub name: String,
    pub container: Selector,
    pub extractor: EntryExtractor,
    pub anchors: Arc<dyn AnchorPolicy<D>>,
    pub factory: Arc<dyn AnnotationFactory>,
}

impl<D: LiveDocument> Clone for WatchProfile<D> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            container: self.container.clone(),
            extractor: self.extractor.clone(),
            anchors: Arc::clone(&self.anchors),
            factory: Arc::clone(&self.factory),
        }
    }
}

/// Observable watcher lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    /// A container appeared and a new generation started
    Tracking { generation: u64 },
    /// A pass reconciled the mounts
    PassApplied {
        generation: u64,
        entries: usize,
        failed_lookups: usize,
        report: ReconcileReport,
    },
    /// A pass finished after its generation ended; nothing was applied
    PassDiscarded { generation: u64 },
    /// The container disappeared and every annotation was removed
    TornDown { generation: u64, removed: usize },
    /// The watcher was stopped or its document closed; nothing applies any more
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatcherState<N> {
    Idle,
    Tracking { container: N, generation: u64 },
    Terminated,
}

struct Core<D: LiveDocument> {
    state: WatcherState<D::Node>,
    generation: u64,
    mounts: MountManager<D>,
}

struct Shared<D: LiveDocument> {
    id: WatcherId,
    doc: D,
    profile: WatchProfile<D>,
    resolver: Arc<MetadataResolver>,
    config: WatcherConfig,
    core: RefCell<Core<D>>,
    events: broadcast::Sender<WatcherEvent>,
}

/// Snapshot of what a pass works on
#[derive(Debug, Clone, Copy)]
struct PassTicket<N> {
    container: N,
    generation: u64,
}

/// Entry point for starting watchers
pub struct Watcher;

impl Watcher {
    /// Subscribe to `doc` and start the reconciliation loop on the current `LocalSet`
    ///
    /// A container already present at start is tracked immediately.
    pub fn spawn<D: LiveDocument>(
        doc: D,
        profile: WatchProfile<D>,
        resolver: Arc<MetadataResolver>,
        config: WatcherConfig,
    ) -> Result<WatcherHandle<D>, ObserverSetupFailure> {
        let mutations = doc.observe()?;
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let mounts = MountManager::new(Arc::clone(&profile.anchors), Arc::clone(&profile.factory));
        let shared = Rc::new(Shared {
            id: WatcherId::new(),
            doc,
            profile,
            resolver,
            config,
            core: RefCell::new(Core {
                state: WatcherState::Idle,
                generation: 0,
                mounts,
            }),
            events,
        });
        let cancel = CancellationToken::new();

        info!(
            "👀 Watcher {} started for profile '{}' ({:?} passes)",
            shared.id, shared.profile.name, shared.config.pass_ordering
        );

        let task = tokio::task::spawn_local(run_loop(Rc::clone(&shared), mutations, cancel.clone()));
        Ok(WatcherHandle {
            shared,
            cancel,
            task: RefCell::new(Some(task)),
        })
    }
}

/// Owner-side control of a running watcher
pub struct WatcherHandle<D: LiveDocument> {
    shared: Rc<Shared<D>>,
    cancel: CancellationToken,
    task: RefCell<Option<JoinHandle<()>>>,
}

impl<D: LiveDocument> WatcherHandle<D> {
    pub fn id(&self) -> WatcherId {
        self.shared.id
    }

    pub fn profile_name(&self) -> &str {
        &self.shared.profile.name
    }

    /// Lifecycle events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<WatcherEvent> {
        self.shared.events.subscribe()
    }

    /// Currently tracked container, if any
    pub fn container(&self) -> Option<D::Node> {
        match self.shared.core.borrow().state {
            WatcherState::Tracking { container, .. } => Some(container),
            _ => None,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.container().is_some()
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.shared.core.borrow().state, WatcherState::Terminated)
    }

    /// Number of mounted annotations
    pub fn mounted_count(&self) -> usize {
        self.shared.core.borrow().mounts.len()
    }

    /// Annotation element mounted for an entry node
    pub fn annotation_for(&self, entry: D::Node) -> Option<D::Node> {
        self.shared.core.borrow().mounts.get(entry).map(|m| m.element)
    }

    /// Stop observing and remove every annotation
    ///
    /// Synchronous and idempotent; no pass starts or applies afterwards.
    pub fn stop(&self) {
        if terminate(&self.shared) {
            self.cancel.cancel();
            info!("🛑 Watcher {} stopped", self.shared.id);
        }
    }

    /// Wait for the loop task to exit (after `stop`, or when the document closes)
    pub async fn join(&self) {
        let task = self.task.borrow_mut().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Watcher {} task ended abnormally: {}", self.shared.id, e);
            }
        }
    }
}

impl<D: LiveDocument> Drop for WatcherHandle<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Tear down and mark terminated; false when already terminated
fn terminate<D: LiveDocument>(shared: &Shared<D>) -> bool {
    let removed = {
        let mut core = shared.core.borrow_mut();
        if core.state == WatcherState::Terminated {
            return false;
        }
        core.state = WatcherState::Terminated;
        core.generation += 1;
        core.mounts.teardown_all(&shared.doc)
    };
    if removed > 0 {
        debug!("Watcher {} removed {} annotation(s) on stop", shared.id, removed);
    }
    let _ = shared.events.send(WatcherEvent::Stopped);
    true
}

async fn run_loop<D: LiveDocument>(
    shared: Rc<Shared<D>>,
    mut mutations: broadcast::Receiver<MutationBatch<D::Node>>,
    cancel: CancellationToken,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();
    let mut running = 0usize;

    // The container may already be on the page
    let mut dirty = refresh_container(&shared, None);

    loop {
        let may_start = match shared.config.pass_ordering {
            PassOrdering::Sequential => running == 0,
            PassOrdering::Overlapping => true,
        };
        if dirty && may_start {
            dirty = false;
            if let Some(ticket) = pass_ticket(&shared) {
                running += 1;
                let pass = run_pass(Rc::clone(&shared), ticket);
                let done = done_tx.clone();
                tokio::task::spawn_local(async move {
                    pass.await;
                    let _ = done.send(());
                });
            }
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            Some(()) = done_rx.recv() => running = running.saturating_sub(1),
            received = mutations.recv() => match received {
                Ok(batch) => dirty |= handle_batch(&shared, Some(&batch)),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Watcher {} lagged by {} batch(es)", shared.id, skipped);
                    dirty |= handle_batch(&shared, None);
                }
                Err(RecvError::Closed) => {
                    info!("Document closed; watcher {} shutting down", shared.id);
                    terminate(&shared);
                    break;
                }
            },
        }
    }
    debug!("Watcher {} loop exited", shared.id);
}

/// Apply one batch to the state machine; true when a pass should run
///
/// `None` means batches were lost and anything may have changed.
fn handle_batch<D: LiveDocument>(shared: &Shared<D>, batch: Option<&MutationBatch<D::Node>>) -> bool {
    let state = shared.core.borrow().state;
    match state {
        WatcherState::Terminated => false,
        WatcherState::Idle => {
            let may_have_appeared = batch.is_none_or(|records| records.iter().any(|r| !r.added.is_empty()));
            may_have_appeared && refresh_container(shared, None)
        }
        WatcherState::Tracking { container, .. } => {
            if !shared.doc.is_connected(container) {
                return refresh_container(shared, Some(container));
            }
            let Some(records) = batch else {
                return true;
            };
            let mut core = shared.core.borrow_mut();
            let mut relevant = false;
            for record in records {
                let touched: Vec<D::Node> = record.added.iter().chain(&record.removed).copied().collect();
                if core.mounts.acknowledge_own(&touched) {
                    continue;
                }
                relevant |= shared.doc.contains(container, record.target);
            }
            relevant
        }
    }
}

/// Re-evaluate which container is present; true when tracking (re)started
///
/// `lost` is the container that was tracked and is now detached.
fn refresh_container<D: LiveDocument>(shared: &Shared<D>, lost: Option<D::Node>) -> bool {
    if let Some(old) = lost {
        let (removed, generation) = {
            let mut core = shared.core.borrow_mut();
            let generation = core.generation;
            core.state = WatcherState::Idle;
            // Late passes of the lost container must not apply
            core.generation += 1;
            (core.mounts.teardown_all(&shared.doc), generation)
        };
        info!(
            "📭 Watcher {} lost container {:?}; removed {} annotation(s)",
            shared.id, old, removed
        );
        let _ = shared.events.send(WatcherEvent::TornDown { generation, removed });
    }

    let Some(container) = shared.doc.select_first(&shared.profile.container) else {
        return false;
    };
    let generation = {
        let mut core = shared.core.borrow_mut();
        core.mounts.forget_own_mutations();
        core.generation += 1;
        core.state = WatcherState::Tracking {
            container,
            generation: core.generation,
        };
        core.generation
    };
    info!(
        "📦 Watcher {} tracking container {:?} (generation {})",
        shared.id, container, generation
    );
    let _ = shared.events.send(WatcherEvent::Tracking { generation });
    true
}

fn pass_ticket<D: LiveDocument>(shared: &Shared<D>) -> Option<PassTicket<D::Node>> {
    match shared.core.borrow().state {
        WatcherState::Tracking { container, generation } => Some(PassTicket { container, generation }),
        _ => None,
    }
}

/// One extract -> resolve -> reconcile cycle
async fn run_pass<D: LiveDocument>(shared: Rc<Shared<D>>, ticket: PassTicket<D::Node>) {
    let entries = shared.profile.extractor.extract(&shared.doc, ticket.container);

    let outcomes = join_all(entries.iter().map(|entry| shared.resolver.resolve(&entry.text))).await;

    let mut failed_lookups = 0;
    let mut resolved: Vec<(Entry<D::Node>, Arc<CatalogRecord>)> = Vec::with_capacity(entries.len());
    for (entry, outcome) in entries.iter().zip(outcomes) {
        match outcome {
            Ok(record) => resolved.push((entry.clone(), record)),
            Err(failure) => {
                failed_lookups += 1;
                if failure.is_no_match() {
                    debug!("No annotation for {}: {}", entry, failure);
                } else {
                    warn!("No annotation for {}: {}", entry, failure);
                }
            }
        }
    }

    let applied = {
        let mut core = shared.core.borrow_mut();
        let current = core.generation == ticket.generation
            && core.state
                == WatcherState::Tracking {
                    container: ticket.container,
                    generation: ticket.generation,
                }
            && shared.doc.is_connected(ticket.container);
        current.then(|| core.mounts.reconcile(&shared.doc, &resolved))
    };

    let event = match applied {
        Some(report) => {
            debug!(
                "Watcher {} pass applied: {} entries, {} failed lookups, {:?}",
                shared.id,
                entries.len(),
                failed_lookups,
                report
            );
            WatcherEvent::PassApplied {
                generation: ticket.generation,
                entries: entries.len(),
                failed_lookups,
                report,
            }
        }
        None => {
            debug!(
                "Watcher {} discarded a pass of generation {}",
                shared.id, ticket.generation
            );
            WatcherEvent::PassDiscarded {
                generation: ticket.generation,
            }
        }
    };
    let _ = shared.events.send(event);
}
