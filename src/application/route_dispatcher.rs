//! Location -> active watcher
//!
//! Compiles the configured routes once, and on every navigation stops the
//! previous watcher completely before the matching route (if any) starts a
//! new one.

#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;

use scraper::Selector;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::extractor::{compile_selector, EntryExtractor, ExtractorProfile};
use super::match_pattern::MatchPattern;
use super::mount_manager::{AnnotationFactory, LinkAnnotationFactory, SelectorAnchorPolicy};
use super::resolver::MetadataResolver;
use super::watcher::{WatchProfile, Watcher, WatcherHandle};
use crate::domain::{LiveDocument, ObserverSetupFailure};
use crate::infrastructure::config::{AppConfig, PathTitleRule, RouteConfig, WatcherConfig};
use crate::utils::slug_to_title;

/// Routing and activation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Invalid match pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Route '{route}' has an invalid selector {reason}")]
    InvalidSelector { route: String, reason: String },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Route '{route}' found no title in the path of {url}")]
    NoPathTitle { route: String, url: String },

    #[error("Watcher could not observe the document: {0}")]
    Observer(#[from] ObserverSetupFailure),
}

impl RouteError {
    pub fn invalid_pattern(pattern: &str, reason: &str) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_selector(route: &str, reason: impl ToString) -> Self {
        Self::InvalidSelector {
            route: route.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether navigating to the same location again may succeed
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Observer(ObserverSetupFailure::Refused { .. }))
    }
}

/// Lookup text taken from a URL path segment, `None` when the path has no such segment
pub fn title_from_path(url: &Url, rule: &PathTitleRule) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.collect();
    let marker = segments.iter().position(|s| *s == rule.marker)?;
    let slug = segments.get(marker + rule.offset)?;
    let title = slug_to_title(slug);
    (!title.is_empty()).then_some(title)
}

/// One compiled route
#[derive(Debug, Clone)]
pub struct Route {
    name: String,
    patterns: Vec<MatchPattern>,
    container: Selector,
    extractor: ExtractorProfile,
    anchors: SelectorAnchorPolicy,
    title_rule: Option<PathTitleRule>,
}

impl Route {
    pub fn compile(config: &RouteConfig) -> Result<Self, RouteError> {
        let patterns = config
            .matches
            .iter()
            .map(|p| MatchPattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;
        let selector_error = |e: String| RouteError::invalid_selector(&config.name, e);

        let container = compile_selector(&config.container).map_err(selector_error)?;
        let extractor = ExtractorProfile::from_selectors(config.entry.as_deref(), config.title.as_deref())
            .map_err(selector_error)?;
        let anchor_selector = config
            .anchor
            .selector
            .as_deref()
            .map(compile_selector)
            .transpose()
            .map_err(selector_error)?;
        let anchors = SelectorAnchorPolicy::new(
            anchor_selector,
            config.anchor.scope,
            config.anchor.position,
            config.anchor.child_index,
        );

        Ok(Self {
            name: config.name.clone(),
            patterns,
            container,
            extractor,
            anchors,
            title_rule: config.title_from_path.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, url: &Url) -> bool {
        self.patterns.iter().any(|p| p.matches(url))
    }

    /// Watch profile for a concrete location
    pub fn profile_for<D: LiveDocument>(
        &self,
        url: &Url,
        factory: Arc<dyn AnnotationFactory>,
    ) -> Result<WatchProfile<D>, RouteError> {
        let mut extractor = self.extractor.clone();
        if let Some(rule) = &self.title_rule {
            let title = title_from_path(url, rule).ok_or_else(|| RouteError::NoPathTitle {
                route: self.name.clone(),
                url: url.to_string(),
            })?;
            extractor = extractor.with_fixed_title(title);
        }
        Ok(WatchProfile {
            name: self.name.clone(),
            container: self.container.clone(),
            extractor: EntryExtractor::new(extractor),
            anchors: Arc::new(self.anchors.clone()),
            factory,
        })
    }
}

/// Ordered routes; the first match wins
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn compile(configs: &[RouteConfig]) -> Result<Self, RouteError> {
        let routes = configs.iter().map(Route::compile).collect::<Result<Vec<_>, _>>()?;
        debug!("Compiled {} route(s)", routes.len());
        Ok(Self { routes })
    }

    pub fn find(&self, url: &Url) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(url))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Keeps at most one watcher active for the current location
pub struct RouteDispatcher<D: LiveDocument> {
    doc: D,
    table: RouteTable,
    resolver: Arc<MetadataResolver>,
    watcher_config: WatcherConfig,
    factory: Arc<dyn AnnotationFactory>,
    location: Option<String>,
    active: Option<WatcherHandle<D>>,
}

impl<D: LiveDocument> RouteDispatcher<D> {
    pub fn new(
        doc: D,
        table: RouteTable,
        resolver: Arc<MetadataResolver>,
        watcher_config: WatcherConfig,
        factory: Arc<dyn AnnotationFactory>,
    ) -> Self {
        Self {
            doc,
            table,
            resolver,
            watcher_config,
            factory,
            location: None,
            active: None,
        }
    }

    /// Dispatcher over the configured routes with the link annotation factory
    pub fn from_config(doc: D, config: &AppConfig, resolver: Arc<MetadataResolver>) -> Result<Self, RouteError> {
        Ok(Self::new(
            doc,
            RouteTable::compile(&config.routes)?,
            resolver,
            config.watcher.clone(),
            Arc::new(LinkAnnotationFactory::from_config(&config.annotation)),
        ))
    }

    pub fn active(&self) -> Option<&WatcherHandle<D>> {
        self.active.as_ref()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub const fn routes(&self) -> &RouteTable {
        &self.table
    }

    /// Switch to `url`
    ///
    /// Navigating to the current location changes nothing. Otherwise the
    /// active watcher is stopped and joined first, then the first matching
    /// route starts a new one. Must run inside a `LocalSet`.
    pub async fn navigate(&mut self, url: &str) -> Result<Option<&WatcherHandle<D>>, RouteError> {
        if self.location.as_deref() == Some(url) {
            debug!("Already at {}; nothing to do", url);
            return Ok(self.active.as_ref());
        }

        self.release().await;
        match self.activate(url) {
            Ok(handle) => {
                self.location = Some(url.to_string());
                self.active = handle;
                Ok(self.active.as_ref())
            }
            Err(e) => {
                warn!("Navigation to {} left no watcher active: {}", url, e);
                Err(e)
            }
        }
    }

    /// Stop the active watcher and forget the location
    pub async fn shutdown(&mut self) {
        self.release().await;
        info!("Route dispatcher shut down");
    }

    async fn release(&mut self) {
        self.location = None;
        if let Some(previous) = self.active.take() {
            info!("Stopping watcher {} ({})", previous.id(), previous.profile_name());
            previous.stop();
            previous.join().await;
        }
    }

    fn activate(&self, url: &str) -> Result<Option<WatcherHandle<D>>, RouteError> {
        let parsed = Url::parse(url).map_err(|e| RouteError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let Some(route) = self.table.find(&parsed) else {
            info!("No route matches {}", url);
            return Ok(None);
        };

        let profile = route.profile_for(&parsed, Arc::clone(&self.factory))?;
        let handle = Watcher::spawn(
            self.doc.clone(),
            profile,
            Arc::clone(&self.resolver),
            self.watcher_config.clone(),
        )?;
        info!("🧭 Route '{}' activated watcher {} for {}", route.name(), handle.id(), url);
        Ok(Some(handle))
    }
}
