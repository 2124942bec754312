//! Live-region annotator
//!
//! Watches a region of a continuously re-rendered document, resolves the
//! entries found in it against a remote catalog, and keeps one annotation
//! mounted next to each resolved entry.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod utils;

pub use application::{MetadataResolver, RouteDispatcher, Watcher, WatcherEvent, WatcherHandle};
pub use domain::{CatalogRecord, Entry, LiveDocument, LookupFailure, ObserverSetupFailure};
pub use infrastructure::{AniListClient, AppConfig, CatalogClient, ConfigManager, MemoryDocument};
