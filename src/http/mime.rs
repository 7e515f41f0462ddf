//! Extension to MIME type table and media-range matching.

const MIME_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("txt", "text/plain"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("atom", "application/atom+xml"),
    ("rss", "application/rss+xml"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
];

/// Looks up the MIME type registered for a file extension (without the dot).
pub fn mime_for_ext(ext: &str) -> Option<&'static str> {
    MIME_TYPES
        .iter()
        .find(|(e, _)| e.eq_ignore_ascii_case(ext))
        .map(|(_, m)| *m)
}

/// A (type, subtype, resolved-format) negotiation entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeTriple {
    pub kind: String,
    pub subtype: String,
    pub format: String,
}

impl MimeTriple {
    pub fn new(kind: impl Into<String>, subtype: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            subtype: subtype.into(),
            format: format.into(),
        }
    }

    /// Builds the triple for a known extension.
    pub fn for_ext(ext: &str) -> Option<Self> {
        let (kind, subtype) = mime_for_ext(ext)?.split_once('/')?;
        Some(Self::new(kind, subtype, ext))
    }
}

/// Tests one media range (`type`, `type/subtype`, `*`, `type/*`, with
/// optional `;params`) against a concrete `kind/subtype`.
pub fn media_range_matches(range: &str, kind: &str, subtype: &str) -> bool {
    let range = range.split(';').next().unwrap_or("");
    let (m1, m2) = match range.split_once('/') {
        Some((a, b)) => (a, b),
        None => (range, ""),
    };

    if m1 == "*" {
        return m2.is_empty() || m2 == "*" || m2.eq_ignore_ascii_case(subtype);
    }
    if !m1.eq_ignore_ascii_case(kind) {
        return false;
    }
    m2.is_empty() || m2 == "*" || m2.eq_ignore_ascii_case(subtype)
}

/// Walks the preferences in order and returns the format of the first triple
/// any preference accepts.
pub fn negotiate<'a>(accept: &[String], offered: &'a [MimeTriple]) -> Option<&'a str> {
    accept.iter().find_map(|range| {
        offered
            .iter()
            .find(|t| media_range_matches(range, &t.kind, &t.subtype))
            .map(|t| t.format.as_str())
    })
}
