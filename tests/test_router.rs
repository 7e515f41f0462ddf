use ember::http::mime::MimeTriple;
use ember::http::request::Method;
use ember::routing::{
    Capture, Conversion, Route, RouteDef, RouteError, RouteTable, Router, SuffixPattern,
    analyse_path,
};

fn accept(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn route(prefix: &str, suffix: &str, handler: &'static str) -> Route<&'static str> {
    Route::new(Method::GET, prefix, SuffixPattern::compile(suffix).unwrap(), handler)
}

/// Prefix/suffix table with shared prefixes and a UTF-8 one.
fn nested() -> Router<&'static str> {
    let mut r = Router::new();
    let mut e1 = route("/hello/", "%uworld", "e1");
    e1.scope = "/hello".into();
    let mut e2 = route("/hello", "", "e2");
    e2.scope = "/hello".into();
    let e3 = route("/hello", "%u", "e3");
    let e4 = route("/a目录/", "%u-%u-%u", "e4");
    for e in [e1, e2, e3, e4] {
        r.register(e).unwrap();
    }
    r
}

#[test]
fn test_sub_prefix_flags() {
    let r = nested();
    let flags: Vec<bool> = r.list(Method::GET).iter().map(|i| i.is_sub).collect();

    assert_eq!(flags, vec![false, true, true, false]);

    let listed = r.list(Method::GET);
    assert_eq!(listed[0].prefix, "/hello/");
    assert_eq!(listed[0].suffix, "%uworld");
    assert_eq!(listed[0].scope, "/hello");
    assert_eq!(listed[3].id, "GET /a目录/%u-%u-%u");
    assert!(r.list(Method::POST).is_empty());
}

#[test]
fn test_lookup_nested_prefixes() {
    let r = nested();

    let m = r.lookup(Method::GET, "/hello", &[]).unwrap();
    assert_eq!(*m.handler, "e2");
    assert_eq!(m.scope, "/hello");
    assert!(m.captures.is_empty());
    assert_eq!(m.format, "html");

    let m = r.lookup(Method::GET, "/hello.js", &[]).unwrap();
    assert_eq!(*m.handler, "e2");
    assert_eq!(m.format, "js");

    let m = r.lookup(Method::GET, "/hello/3world", &[]).unwrap();
    assert_eq!(*m.handler, "e1");
    assert_eq!(m.captures, vec![Capture::Int(3)]);

    // Shares e2's prefix but e2 rejects the leftover "3".
    let m = r.lookup(Method::GET, "/hello3", &[]).unwrap();
    assert_eq!(*m.handler, "e3");
    assert_eq!(m.captures, vec![Capture::Int(3)]);

    assert!(r.lookup(Method::GET, "/world", &[]).is_none());

    let m = r.lookup(Method::GET, "/a目录/2013-6-1", &[]).unwrap();
    assert_eq!(
        m.captures,
        vec![Capture::Int(2013), Capture::Int(6), Capture::Int(1)]
    );
}

#[test]
fn test_unknown_method_is_not_found() {
    let r = nested();
    assert!(r.lookup(Method::DELETE, "/hello", &[]).is_none());
}

#[test]
fn test_lookup_is_deterministic() {
    let r = nested();
    let paths = ["/hello3", "/hello", "/nope", "/hello/7world", "/hello.json"];
    let first: Vec<Option<&str>> = paths
        .iter()
        .map(|p| r.lookup(Method::GET, p, &[]).map(|m| *m.handler))
        .collect();

    for _ in 0..5 {
        for p in paths.iter().rev() {
            r.lookup(Method::GET, p, &[]);
        }
        let again: Vec<Option<&str>> = paths
            .iter()
            .map(|p| r.lookup(Method::GET, p, &[]).map(|m| *m.handler))
            .collect();
        assert_eq!(again, first);
    }
}

#[test]
fn test_exact_and_capture_routes() {
    let router = RouteTable::new()
        .get("/users", "list")
        .get("/users/%d", "show")
        .compile()
        .unwrap();

    let m = router.lookup(Method::GET, "/users", &[]).unwrap();
    assert_eq!(*m.handler, "list");
    assert!(m.captures.is_empty());

    let m = router.lookup(Method::GET, "/users/42", &[]).unwrap();
    assert_eq!(*m.handler, "show");
    assert_eq!(m.captures, vec![Capture::Int(42)]);
    assert_eq!(m.captures[0].as_int(), Some(42));

    assert!(router.lookup(Method::GET, "/users/abc", &[]).is_none());
}

#[test]
fn test_extension_bypasses_negotiation() {
    let router = RouteTable::new()
        .route(Method::GET, "/report", "report", &["json", "xml"])
        .compile()
        .unwrap();

    // Accept would prefer html, but the extension decides.
    let m = router
        .lookup(Method::GET, "/report.json", &accept(&["text/html"]))
        .unwrap();
    assert_eq!(m.format, "json");

    assert!(router.lookup(Method::GET, "/report.csv", &[]).is_none());
}

#[test]
fn test_rejected_extension_falls_through() {
    let router = RouteTable::new()
        .route(Method::GET, "/report", "strict", &["json"])
        .get("/report", "lenient")
        .compile()
        .unwrap();

    let m = router.lookup(Method::GET, "/report.csv", &[]).unwrap();
    assert_eq!(*m.handler, "lenient");
    assert_eq!(m.format, "csv");
}

#[test]
fn test_wildcard_negotiation_follows_accept_order() {
    let mut router = Router::new();
    let mut r = route("/doc", "", "doc");
    r.accept_mimes = Some(vec![
        MimeTriple::new("application", "json", "json"),
        MimeTriple::new("text", "html", "html"),
    ]);
    router.register(r).unwrap();

    let m = router
        .lookup(Method::GET, "/doc", &accept(&["application/*", "text/html;q=0.5"]))
        .unwrap();
    assert_eq!(m.format, "json");

    let m = router
        .lookup(Method::GET, "/doc", &accept(&["text/html", "application/*"]))
        .unwrap();
    assert_eq!(m.format, "html");
}

#[test]
fn test_unmatched_negotiation_rejects_entry() {
    let router = RouteTable::new()
        .route(Method::GET, "/data", "json-only", &["json"])
        .compile()
        .unwrap();

    assert!(router
        .lookup(Method::GET, "/data", &accept(&["image/png"]))
        .is_none());
    assert_eq!(
        router.lookup(Method::GET, "/data", &accept(&["*/*"])).unwrap().format,
        "json"
    );
    // No Accept header at all means anything goes.
    assert_eq!(router.lookup(Method::GET, "/data", &[]).unwrap().format, "json");
}

#[test]
fn test_no_table_defaults_to_html() {
    let router = RouteTable::new().get("/hello", "h").compile().unwrap();

    let m = router
        .lookup(Method::GET, "/hello", &accept(&["text/plain"]))
        .unwrap();
    assert_eq!(m.format, "html");
}

#[test]
fn test_capture_count_mismatch_is_rejected() {
    let mut router: Router<&str> = Router::new();
    let mut r = route("/a/", "%d-%d", "h");
    r.conversions = vec![Conversion::Int];

    assert_eq!(
        router.register(r),
        Err(RouteError::CaptureMismatch {
            pattern: "%d-%d".to_string(),
            captures: 2,
            conversions: 1,
        })
    );
    assert!(router.is_empty());
}

#[test]
fn test_bad_patterns_fail_at_compile() {
    let table = RouteTable::new().get("/a/%q", "h");
    assert!(matches!(table.compile(), Err(RouteError::BadPattern { .. })));

    let table = RouteTable::new().get("no-slash", "h");
    assert!(matches!(table.compile(), Err(RouteError::BadPath(_))));
}

#[test]
fn test_declared_conversions_override_placeholders() {
    let mut router = Router::new();
    let mut r = route("/files/", "%x", "h");
    r.conversions = vec![Conversion::Str];
    router.register(r).unwrap();

    let m = router.lookup(Method::GET, "/files/ff", &[]).unwrap();
    assert_eq!(m.captures, vec![Capture::Str("ff".into())]);
}

#[test]
fn test_hex_and_float_conversions() {
    let router = RouteTable::new()
        .get("/hex/%x", "hex")
        .get("/price/%f", "price")
        .compile()
        .unwrap();

    let m = router.lookup(Method::GET, "/hex/1F", &[]).unwrap();
    assert_eq!(m.captures, vec![Capture::Int(31)]);

    let m = router.lookup(Method::GET, "/price/4.5", &[]).unwrap();
    assert_eq!(m.captures, vec![Capture::Float(4.5)]);
}

#[test]
fn test_overflowing_capture_is_none() {
    let router = RouteTable::new().get("/n/%u", "n").compile().unwrap();

    let m = router
        .lookup(Method::GET, "/n/123456789012345678901234567890", &[])
        .unwrap();
    assert_eq!(m.captures, vec![Capture::None]);
}

#[test]
fn test_table_orders_prefixes_descending() {
    let routes = RouteTable::new()
        .get("/hello/%f", "hello_f")
        .post("/%s/%u-%d", "post")
        .scope("/hel")
        .get("/", "hel")
        .scope("/ello")
        .get("/%s", "ello_s")
        .build()
        .unwrap();

    let prefixes: Vec<&str> = routes.iter().map(|r| r.prefix.as_str()).collect();
    let scopes: Vec<&str> = routes.iter().map(|r| r.scope.as_str()).collect();
    let handlers: Vec<&str> = routes.iter().map(|r| r.handler).collect();

    assert_eq!(prefixes, vec!["/hello/", "/hel", "/ello/", "/"]);
    assert_eq!(scopes, vec!["/", "/hel", "/ello", "/"]);
    assert_eq!(handlers, vec!["hello_f", "hel", "ello_s", "post"]);
}

#[test]
fn test_explicit_route_ids() {
    let mut table = RouteTable::new();
    table.add(RouteDef {
        method: Method::PUT,
        scope: "/api".into(),
        path: "/items/%u".into(),
        handler: "put",
        id: Some("#update".into()),
        accept_exts: vec![],
    });
    let router = table.compile().unwrap();

    let m = router.lookup(Method::PUT, "/api/items/9", &[]).unwrap();
    assert_eq!(m.id, "#update");
    assert_eq!(m.scope, "/api");
}

#[test]
fn test_clear_releases_routes() {
    let mut r = nested();
    assert_eq!(r.len(), 4);

    r.clear();
    assert!(r.is_empty());
    assert!(r.lookup(Method::GET, "/hello", &[]).is_none());

    r.register(route("/hello", "", "again")).unwrap();
    assert_eq!(*r.lookup(Method::GET, "/hello", &[]).unwrap().handler, "again");
}

#[test]
fn test_analyse_path() {
    assert_eq!(
        analyse_path("/hello/%d-world%u/%s/").unwrap(),
        ("/hello/".to_string(), "%d-world%u/%s".to_string())
    );
    assert_eq!(
        analyse_path("/hello").unwrap(),
        ("/hello".to_string(), String::new())
    );
    assert_eq!(analyse_path("/").unwrap(), ("/".to_string(), String::new()));
}
