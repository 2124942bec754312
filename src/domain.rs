//! Domain module - entries, catalog records and the live document port
//!
//! This module contains the entities the reconciliation engine reasons about
//! and the trait boundary to the externally-controlled document.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod catalog_record;
pub mod document;
pub mod entry;
pub mod errors;
pub mod value_objects;

// Re-export commonly used items for convenience
pub use catalog_record::{CatalogRecord, TitleVariants};
pub use document::{AnchorPoint, InsertPosition, LiveDocument, MutationBatch, MutationRecord};
pub use entry::{normalize_text, Entry};
pub use errors::{AnchorUnavailable, LookupFailure, ObserverSetupFailure};
pub use value_objects::WatcherId;
