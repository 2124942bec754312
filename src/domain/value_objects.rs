//! # Domain Value Objects

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one watcher instance, used to correlate log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatcherId(Uuid);

impl WatcherId {
    /// Creates a new unique watcher ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WatcherId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WatcherId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is enough to tell watchers apart in a single page session
        let full = self.0.simple().to_string();
        write!(f, "{}", &full[..8])
    }
}
