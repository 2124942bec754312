//! Remote catalog lookup boundary
//!
//! One query operation: free text in, best single match or "no match" out.

use async_trait::async_trait;

use crate::domain::{CatalogRecord, LookupFailure};

/// A single request/response lookup against the remote catalog
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Best match for `query`, or `LookupFailure::NoMatch`
    async fn search(&self, query: &str) -> Result<CatalogRecord, LookupFailure>;

    /// Short name for logs
    fn name(&self) -> &'static str {
        "catalog"
    }
}
