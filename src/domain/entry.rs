use std::fmt;

/// One extracted item of interest inside the tracked container.
///
/// The node handle is only meaningful while the node stays attached; entries
/// are recomputed from scratch on every extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<N> {
    pub node: N,
    pub text: String,
}

impl<N: Copy> Entry<N> {
    pub fn new(node: N, text: impl Into<String>) -> Self {
        Self {
            node,
            text: text.into(),
        }
    }
}

impl<N: fmt::Debug> fmt::Display for Entry<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} \"{}\"", self.node, self.text)
    }
}

/// Trim and collapse internal whitespace runs to a single space
#[must_use]
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
