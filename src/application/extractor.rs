//! Entry extraction from the tracked container
//!
//! A pure read of the container at call time: no waiting, no mutation.
//! Nodes whose display text is empty are "not yet an entry" and are left out;
//! they show up in a later extraction once populated.

#![allow(clippy::uninlined_format_args)]

use std::collections::HashSet;

use scraper::Selector;
use tracing::{debug, trace, warn};

use crate::domain::{normalize_text, Entry, LiveDocument};

/// Compile a selector string, keeping the offending text in the error
pub fn compile_selector(css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|e| {
        warn!("Failed to compile selector '{}': {}", css, e);
        format!("'{}': {}", css, e)
    })
}

/// How entries and their display text are found inside a container
#[derive(Debug, Clone, Default)]
pub struct ExtractorProfile {
    /// Entries inside the container; the container itself when `None`
    pub entry_selector: Option<Selector>,
    /// Title inside each entry; the entry's whole text when `None`
    pub title_selector: Option<Selector>,
    /// Fixed display text for every entry (e.g. taken from the URL)
    pub fixed_title: Option<String>,
}

impl ExtractorProfile {
    /// Compile a profile from selector strings
    pub fn from_selectors(entry: Option<&str>, title: Option<&str>) -> Result<Self, String> {
        Ok(Self {
            entry_selector: entry.map(compile_selector).transpose()?,
            title_selector: title.map(compile_selector).transpose()?,
            fixed_title: None,
        })
    }

    #[must_use]
    pub fn with_fixed_title(mut self, title: impl Into<String>) -> Self {
        self.fixed_title = Some(title.into());
        self
    }
}

/// Produces the ordered entry set of a container
#[derive(Debug, Clone)]
pub struct EntryExtractor {
    profile: ExtractorProfile,
}

impl EntryExtractor {
    pub const fn new(profile: ExtractorProfile) -> Self {
        Self { profile }
    }

    pub const fn profile(&self) -> &ExtractorProfile {
        &self.profile
    }

    /// Entries of `container` in document order, empty-text nodes excluded
    pub fn extract<D: LiveDocument>(&self, doc: &D, container: D::Node) -> Vec<Entry<D::Node>> {
        let candidates = match &self.profile.entry_selector {
            Some(selector) => doc.select_within(container, selector),
            None => vec![container],
        };

        let mut seen = HashSet::with_capacity(candidates.len());
        let mut entries = Vec::with_capacity(candidates.len());
        for node in candidates {
            if !seen.insert(node) {
                continue;
            }
            match self.display_text(doc, node) {
                Some(text) => entries.push(Entry { node, text }),
                None => trace!("Skipping {:?}: no display text yet", node),
            }
        }

        debug!("Extracted {} entries from container {:?}", entries.len(), container);
        entries
    }

    fn display_text<D: LiveDocument>(&self, doc: &D, node: D::Node) -> Option<String> {
        let raw = if let Some(fixed) = &self.profile.fixed_title {
            fixed.clone()
        } else if let Some(selector) = &self.profile.title_selector {
            doc.select_within(node, selector)
                .into_iter()
                .filter_map(|title| doc.text_content(title))
                .find(|text| !text.trim().is_empty())?
        } else {
            doc.text_content(node)?
        };
        let text = normalize_text(&raw);
        (!text.is_empty()).then_some(text)
    }
}
