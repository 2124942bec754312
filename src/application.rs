//! Application layer
//!
//! The reconciliation engine: extraction, resolution, mount bookkeeping,
//! the live-region watcher, and route dispatch on top of them.

pub mod extractor;
pub mod match_pattern;
pub mod mount_manager;
pub mod resolver;
pub mod route_dispatcher;
pub mod watcher;

pub use extractor::{compile_selector, EntryExtractor, ExtractorProfile};
pub use match_pattern::MatchPattern;
pub use mount_manager::{
    AnchorPolicy, AnnotationFactory, LinkAnnotationFactory, MountManager, MountedAnnotation, ReconcileReport,
    SelectorAnchorPolicy,
};
pub use resolver::{CacheStats, MetadataResolver, RecordCache};
pub use route_dispatcher::{title_from_path, Route, RouteDispatcher, RouteError, RouteTable};
pub use watcher::{WatchProfile, Watcher, WatcherEvent, WatcherHandle};
