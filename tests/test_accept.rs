use ember::http::accept::{MAX_ACCEPT_LEN, parse_accept, parse_weighted};
use ember::http::mime::{MimeTriple, media_range_matches, mime_for_ext, negotiate};

fn list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_orders_by_quality_stable() {
    assert_eq!(parse_accept("a;q=0.5, b, c;q=0.5"), list(&["b", "a", "c"]));
}

#[test]
fn test_browser_style_header() {
    let a = parse_accept("text/plain; q=0.5, text/html,text/x-dvi; q=3.8, text/x-c");
    assert_eq!(a, list(&["text/html", "text/x-dvi", "text/x-c", "text/plain"]));
}

#[test]
fn test_zero_and_negative_quality_dropped() {
    assert_eq!(parse_accept("text/plain; q=0.0, text/html"), list(&["text/html"]));
    assert_eq!(parse_accept("*, text/plain; q=-3"), list(&["*"]));
    assert_eq!(parse_accept("x;q=-1, y;q=0"), Vec::<String>::new());
}

#[test]
fn test_out_of_range_quality_clamped() {
    assert_eq!(parse_weighted("x;q=2"), vec![("x".to_string(), 1.0)]);
    assert_eq!(parse_weighted("x;q=junk"), vec![("x".to_string(), 1.0)]);
}

#[test]
fn test_quality_uses_longest_numeric_prefix() {
    assert_eq!(parse_weighted("x;q=0.5e"), vec![("x".to_string(), 0.5)]);
    assert_eq!(parse_weighted("x;q=0.5-x"), vec![("x".to_string(), 0.5)]);
    assert_eq!(parse_accept("a;q=0.5e, b;q=0.7"), list(&["b", "a"]));
}

#[test]
fn test_bare_q_segment_is_a_range() {
    let a = parse_accept("q=0.1, text/html");
    assert_eq!(a.len(), 2);
    assert_eq!(a[1], "text/html");
}

#[test]
fn test_empty_header() {
    assert!(parse_accept("").is_empty());
    assert!(parse_accept(" , ,").is_empty());
}

#[test]
fn test_long_header_truncated() {
    let mut value = "a,".repeat(MAX_ACCEPT_LEN);
    value.push_str("late");
    let a = parse_accept(&value);
    assert!(!a.iter().any(|r| r == "late"));
    assert_eq!(a.len(), MAX_ACCEPT_LEN / 2);
}

#[test]
fn test_media_ranges() {
    assert!(media_range_matches("*", "text", "html"));
    assert!(media_range_matches("text/*", "text", "plain"));
    assert!(media_range_matches("TEXT/HTML", "text", "html"));
    assert!(!media_range_matches("text/*", "application", "json"));
}

#[test]
fn test_wildcard_type_matches_subtype_in_any_case() {
    assert!(media_range_matches("*/JSON", "application", "json"));
    assert!(media_range_matches("*/Html", "text", "html"));
    assert!(!media_range_matches("*/XML", "application", "json"));
}

#[test]
fn test_negotiate_first_preference_wins() {
    let html = [MimeTriple::new("text", "html", "html")];
    assert_eq!(negotiate(&list(&["*"]), &html), Some("html"));

    let offered = [
        MimeTriple::new("some", "text", "txt"),
        MimeTriple::new("text", "html", "html"),
    ];
    assert_eq!(
        negotiate(&list(&["application/javascript", "text/*"]), &offered),
        Some("html")
    );
    assert_eq!(negotiate(&list(&["text/*"]), &offered[..1]), None);
}

#[test]
fn test_extension_table() {
    assert_eq!(mime_for_ext("json"), Some("application/json"));
    assert_eq!(mime_for_ext("html"), Some("text/html"));
    assert_eq!(mime_for_ext("definitely-not"), None);
}
