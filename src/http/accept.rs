//! `Accept`-style header parsing.
//!
//! Produces the Accept Preference List: media ranges ordered by descending
//! quality, ties kept in header order. Input is truncated before parsing
//! because the insertion sort is quadratic in the number of segments.

/// Longest header value considered, in bytes.
pub const MAX_ACCEPT_LEN: usize = 1000;

/// Parses a raw `Accept` (or `Accept-Language`, `Accept-Encoding`, ...) value.
pub fn parse_accept(value: &str) -> Vec<String> {
    parse_weighted(value).into_iter().map(|(v, _)| v).collect()
}

/// Like [`parse_accept`] but keeps the quality next to each range.
pub fn parse_weighted(value: &str) -> Vec<(String, f64)> {
    let value = truncate(value, MAX_ACCEPT_LEN);
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();

    let mut out: Vec<(String, f64)> = Vec::new();
    for seg in compact.split(',') {
        if seg.is_empty() {
            continue;
        }
        let (range, q) = match seg.find(";q=") {
            Some(0) => continue,
            Some(i) => (&seg[..i], quality(&seg[i + 3..])),
            None => (seg, 1.0),
        };
        if q <= 0.0 {
            continue;
        }
        let at = out.iter().position(|(_, existing)| *existing < q).unwrap_or(out.len());
        out.insert(at, (range.to_string(), q));
    }
    out
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Reads the numeric prefix of a `q=` value. Anything unparsable or above 3
/// counts as malformed and becomes 1.0; values in (1, 3] are clamped to 1.0.
fn quality(raw: &str) -> f64 {
    let end = raw
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')))
        .unwrap_or(raw.len());
    let parsed = (1..=end).rev().find_map(|n| raw[..n].parse::<f64>().ok());
    match parsed {
        Some(q) if q > 1.0 => 1.0,
        Some(q) => q,
        None => 1.0,
    }
}
