//! Configuration infrastructure
//!
//! Contains configuration loading for the catalog client, the watcher, the
//! logging system and the route table.
//!
//! Configuration is layered, later layers overriding earlier ones:
//! 1. Built-in defaults (`AppConfig::default()`)
//! 2. Optional TOML file (explicit path, else the user config directory)
//! 3. Environment variables (`ANNOTATOR__CATALOG__ENDPOINT=...`)

#![allow(clippy::uninlined_format_args)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote catalog lookup settings
    pub catalog: CatalogConfig,

    /// Reconciliation loop settings
    pub watcher: WatcherConfig,

    /// Annotation markup settings
    pub annotation: AnnotationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Which pages activate a watcher, and how
    pub routes: Vec<RouteConfig>,
}

/// Remote catalog lookup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// GraphQL endpoint
    pub endpoint: String,

    /// Media type filter sent with every search
    pub media_type: String,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Client-side rate limit; 0 disables limiting
    pub max_requests_per_minute: u32,

    /// User agent string
    pub user_agent: String,
}

/// How reconciliation passes triggered by overlapping mutations are ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOrdering {
    /// Passes run to completion in the order their mutations were observed;
    /// mutations arriving mid-pass are coalesced into one follow-up pass
    #[default]
    Sequential,
    /// Every pass starts immediately; the last one to finish wins
    Overlapping,
}

/// Reconciliation loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    pub pass_ordering: PassOrdering,

    /// Lifecycle events buffered per subscriber
    pub event_capacity: usize,
}

/// Annotation markup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationConfig {
    /// Marker class put on every injected element
    pub css_class: String,

    /// Logo image shown inside the link
    pub logo_src: String,

    /// Alt text of the logo
    pub logo_alt: String,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Directory for log files; next to the executable when unset
    pub log_directory: Option<PathBuf>,

    /// Log file name prefix (daily rotation appends the date)
    pub file_prefix: String,

    /// Module-specific log level filters (e.g., "reqwest": "info")
    pub module_filters: HashMap<String, String>,
}

/// Where the anchor selector is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorScope {
    /// Inside the entry node
    #[default]
    Entry,
    /// Anywhere in the document
    Document,
}

/// Where the annotation goes among the anchor's children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorPosition {
    #[default]
    Append,
    Prepend,
    /// Before the child at `child_index`, appending when there is no such child
    BeforeChild,
}

/// Anchor-selection settings of one route
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnchorConfig {
    /// Element receiving the annotation; the entry itself when unset
    pub selector: Option<String>,
    pub scope: AnchorScope,
    pub position: AnchorPosition,
    pub child_index: usize,
}

/// Derive the lookup text from a URL path segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathTitleRule {
    /// Path segment to look for, e.g. "series"
    pub marker: String,

    /// Distance from the marker to the slug segment
    pub offset: usize,
}

/// One route: URL patterns plus the watch profile to run on them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub name: String,

    /// WebExtension match patterns
    pub matches: Vec<String>,

    /// Selector of the tracked container
    pub container: String,

    /// Selector of entries inside the container; the container itself when unset
    pub entry: Option<String>,

    /// Selector of the title inside each entry; the whole entry text when unset
    pub title: Option<String>,

    /// Take the lookup text from the URL instead of the document
    pub title_from_path: Option<PathTitleRule>,

    pub anchor: AnchorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            watcher: WatcherConfig::default(),
            annotation: AnnotationConfig::default(),
            logging: LoggingConfig::default(),
            routes: default_routes(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: anilist::GRAPHQL_ENDPOINT.to_string(),
            media_type: anilist::MEDIA_TYPE_ANIME.to_string(),
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            max_requests_per_minute: anilist::RATE_LIMIT_PER_MINUTE,
            user_agent: defaults::USER_AGENT.to_string(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            pass_ordering: PassOrdering::default(),
            event_capacity: defaults::EVENT_CAPACITY,
        }
    }
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            css_class: defaults::ANNOTATION_CLASS.to_string(),
            logo_src: anilist::LOGO_SRC.to_string(),
            logo_alt: anilist::LOGO_ALT.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_directory: None,
            file_prefix: defaults::LOG_FILE_PREFIX.to_string(),
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("reqwest".to_string(), "info".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters.insert("h2".to_string(), "warn".to_string());
                filters.insert("html5ever".to_string(), "warn".to_string());
                filters.insert("selectors".to_string(), "warn".to_string());
                filters
            },
        }
    }
}

/// Routes of the original target site: single series pages and browse grids
fn default_routes() -> Vec<RouteConfig> {
    vec![
        RouteConfig {
            name: "series".to_string(),
            matches: vec!["*://*.crunchyroll.com/*/series/*".to_string()],
            container: ".bottom-actions-wrapper".to_string(),
            entry: None,
            title: None,
            title_from_path: Some(PathTitleRule {
                marker: "series".to_string(),
                offset: 2,
            }),
            anchor: AnchorConfig {
                selector: None,
                scope: AnchorScope::Entry,
                position: AnchorPosition::BeforeChild,
                child_index: 1,
            },
        },
        RouteConfig {
            name: "browse".to_string(),
            matches: vec![
                "*://*.crunchyroll.com/*/videos/*".to_string(),
                "*://*.crunchyroll.com/*/simulcasts*".to_string(),
            ],
            container: ".erc-browse-cards-collection".to_string(),
            entry: Some(".browse-card".to_string()),
            title: Some(".browse-card-hover__title, h4".to_string()),
            title_from_path: None,
            anchor: AnchorConfig {
                selector: Some(".browse-card__footer, .browse-card-body".to_string()),
                scope: AnchorScope::Entry,
                position: AnchorPosition::Append,
                child_index: 0,
            },
        },
    ]
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to get user config directory")]
    NoConfigDirectory,

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration value for '{field}': {message}")]
    Invalid { field: String, message: String },
}

/// Configuration manager for layered loading
pub struct ConfigManager {
    config_path: Option<PathBuf>,
    required: bool,
    env_prefix: String,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(defaults::APP_DIR_NAME))
            .ok_or(ConfigError::NoConfigDirectory)
    }

    /// Use `config.toml` in the user config directory when it exists
    pub fn new() -> Self {
        let config_path = Self::get_config_dir()
            .ok()
            .map(|dir| dir.join(defaults::CONFIG_FILE_NAME));
        Self {
            config_path,
            required: false,
            env_prefix: defaults::ENV_PREFIX.to_string(),
        }
    }

    /// Use an explicit file, which must exist
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            config_path: Some(path.as_ref().to_path_buf()),
            required: true,
            env_prefix: defaults::ENV_PREFIX.to_string(),
        }
    }

    /// Override the environment variable prefix
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = prefix.to_string();
        self
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Merge every layer into one `AppConfig`
    pub fn load_config(&self) -> Result<AppConfig, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&AppConfig::default())?);

        if let Some(path) = &self.config_path {
            debug!("Reading configuration file {:?} (required: {})", path, self.required);
            builder = builder.add_source(config::File::from(path.as_path()).required(self.required));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("__")
                .separator("__"),
        );

        let app_config: AppConfig = builder.build()?.try_deserialize()?;
        Self::validate(&app_config)?;

        info!(
            "✅ Configuration loaded: endpoint={}, routes={}, pass_ordering={:?}",
            app_config.catalog.endpoint,
            app_config.routes.len(),
            app_config.watcher.pass_ordering
        );
        Ok(app_config)
    }

    fn validate(config: &AppConfig) -> Result<(), ConfigError> {
        if config.catalog.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "catalog.endpoint".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if config.catalog.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "catalog.request_timeout_seconds".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if config.watcher.event_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "watcher.event_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// AniList service constants
pub mod anilist {
    /// GraphQL endpoint
    pub const GRAPHQL_ENDPOINT: &str = "https://graphql.anilist.co";

    /// Media type searched by default
    pub const MEDIA_TYPE_ANIME: &str = "ANIME";

    /// Published per-client request budget
    pub const RATE_LIMIT_PER_MINUTE: u32 = 90;

    /// Logo shown in annotations
    pub const LOGO_SRC: &str = "https://anilist.co/img/icons/icon.svg";

    pub const LOGO_ALT: &str = "AniList";
}

/// Default values
pub mod defaults {
    pub const APP_DIR_NAME: &str = "live-region-annotator";

    pub const CONFIG_FILE_NAME: &str = "config.toml";

    pub const ENV_PREFIX: &str = "ANNOTATOR";

    pub const REQUEST_TIMEOUT_SECONDS: u64 = 10;

    pub const USER_AGENT: &str = concat!("live-region-annotator/", env!("CARGO_PKG_VERSION"));

    pub const EVENT_CAPACITY: usize = 64;

    pub const ANNOTATION_CLASS: &str = "catalog-annotation";

    pub const LOG_LEVEL: &str = "info";

    pub const LOG_FILE_PREFIX: &str = "live-region-annotator.log";
}
