//! Error taxonomy of the reconciliation engine
//!
//! Per-entry failures (`LookupFailure`, `AnchorUnavailable`) are recoverable
//! and never abort a pass; `ObserverSetupFailure` is fatal for one watcher.

use thiserror::Error;

/// A catalog lookup that produced no record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupFailure {
    #[error("No catalog match for '{query}'")]
    NoMatch { query: String },

    #[error("Lookup for '{query}' timed out after {timeout_seconds}s")]
    Timeout { query: String, timeout_seconds: u64 },

    #[error("Transport error while looking up '{query}': {message}")]
    Transport { query: String, message: String },

    #[error("Catalog service error {status} for '{query}': {message}")]
    Service {
        query: String,
        status: u16,
        message: String,
    },

    #[error("Malformed catalog response for '{query}': {reason}")]
    Malformed { query: String, reason: String },

    #[error("Empty lookup text")]
    EmptyQuery,
}

impl LookupFailure {
    pub fn no_match(query: &str) -> Self {
        Self::NoMatch {
            query: query.to_string(),
        }
    }

    pub fn transport(query: &str, message: impl ToString) -> Self {
        Self::Transport {
            query: query.to_string(),
            message: message.to_string(),
        }
    }

    pub fn service(query: &str, status: u16, message: impl ToString) -> Self {
        Self::Service {
            query: query.to_string(),
            status,
            message: message.to_string(),
        }
    }

    pub fn malformed(query: &str, reason: impl ToString) -> Self {
        Self::Malformed {
            query: query.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether asking again later could produce a record
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NoMatch { .. } | Self::EmptyQuery | Self::Malformed { .. } => false,
            Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::Service { status, .. } => *status == 429 || *status >= 500,
        }
    }

    pub const fn is_no_match(&self) -> bool {
        matches!(self, Self::NoMatch { .. })
    }
}

/// The anchor policy found no insertion point for an entry right now
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No anchor point for entry '{entry_text}'")]
pub struct AnchorUnavailable {
    pub entry_text: String,
}

/// The document could not be subscribed to
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObserverSetupFailure {
    #[error("Document is closed")]
    DocumentClosed,

    #[error("Document refused the mutation subscription: {reason}")]
    Refused { reason: String },
}
