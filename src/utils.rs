//! Small text helpers shared by the document adapter, the annotation factory
//! and the route table.

use percent_encoding::percent_decode_str;

/// Escape text for use inside HTML text content or a quoted attribute value
#[must_use]
pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Turn a URL path segment such as `my-hero-academia` into lookup text
///
/// Percent-escapes are decoded; `+`, dashes and underscores become spaces.
#[must_use]
pub fn slug_to_title(slug: &str) -> String {
    let spaced: String = percent_decode_str(slug)
        .decode_utf8_lossy()
        .chars()
        .map(|c| if matches!(c, '+' | '-' | '_') { ' ' } else { c })
        .collect();
    crate::domain::normalize_text(&spaced)
}
