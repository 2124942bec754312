//! Infrastructure layer
//!
//! Configuration, logging, the catalog service client, and the in-process
//! live document.

pub mod anilist_client;
pub mod catalog_client;
pub mod config;
pub mod logging;
pub mod memory_document;

pub use anilist_client::AniListClient;
pub use catalog_client::CatalogClient;
pub use config::{AppConfig, ConfigError, ConfigManager, PassOrdering, WatcherConfig};
pub use logging::{init_logging, init_logging_with_config};
pub use memory_document::MemoryDocument;
