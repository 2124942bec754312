use serde::{Deserialize, Serialize};

/// Display-name variants of a catalog record; any of them may be absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleVariants {
    /// Primary (English) title
    pub english: Option<String>,
    /// Title in the original script
    pub native: Option<String>,
    /// Romanized alternate title
    pub romaji: Option<String>,
}

impl TitleVariants {
    /// Best available title: english, then romaji, then native
    #[must_use]
    pub fn preferred(&self) -> Option<&str> {
        [&self.english, &self.romaji, &self.native]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|t| !t.trim().is_empty())
    }
}

/// Canonical metadata record resolved from the remote catalog.
///
/// Immutable once obtained and uniquely identified by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: u64,
    pub title: TitleVariants,
    #[serde(rename = "siteUrl")]
    pub site_url: String,
}

impl CatalogRecord {
    pub fn new(id: u64, title: TitleVariants, site_url: impl Into<String>) -> Self {
        Self {
            id,
            title,
            site_url: site_url.into(),
        }
    }

    /// Label used for the annotation tooltip
    #[must_use]
    pub fn display_title(&self) -> String {
        self.title
            .preferred()
            .map_or_else(|| format!("#{}", self.id), ToString::to_string)
    }
}
