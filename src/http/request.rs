use percent_encoding::percent_decode_str;

/// HTTP request methods.
///
/// Every method gets its own route table; an unknown method string never
/// reaches the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
}

impl Method {
    pub const ALL: [Method; 7] = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::HEAD,
        Method::OPTIONS,
        Method::PATCH,
    ];

    /// Parses an HTTP method from a string.
    ///
    /// # Arguments
    ///
    /// * `s` - String representation of the method (case-sensitive, typically uppercase)
    ///
    /// # Returns
    ///
    /// `Some(Method)` if the string matches a known method, `None` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// # use ember::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rewrites a header name into `Ab-Cd` form.
pub fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }
    out
}

/// Ordered header list with case-insensitive lookup. Names are stored in
/// canonical casing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a header.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.position(name) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((canonical_header_name(name), value)),
        }
    }

    /// Sets a header only if it is not present yet.
    pub fn insert_default(&mut self, name: &str, value: impl Into<String>) {
        if self.position(name).is_none() {
            self.entries.push((canonical_header_name(name), value.into()));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

/// The routable part of a request, frozen once headers are complete.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Effective method (after `_method` override)
    pub method: Method,
    /// Percent-decoded path without query or matrix parameters
    pub path: String,
    /// Raw query string, without the leading `?`
    pub query: Option<String>,
    /// HTTP version, e.g. "HTTP/1.1"
    pub version: String,
    pub headers: HeaderMap,
    /// Accept Preference List, highest quality first
    pub accept: Vec<String>,
}

impl RequestHead {
    /// Retrieves a header value by name (case-insensitive).
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Retrieves the Content-Length header value and parses it as a usize.
    ///
    /// Returns 0 if the header is missing or not a valid number.
    pub fn content_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Decoded query parameters in order of appearance.
    pub fn params(&self) -> Vec<(String, String)> {
        self.query
            .as_deref()
            .map(parse_query)
            .unwrap_or_default()
    }

    pub fn param(&self, key: &str) -> Option<String> {
        self.params()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Splits a request target into a decoded path and the raw query.
///
/// `+` is left alone in the path, and `;matrix` parameters are dropped.
pub fn split_target(target: &str) -> (String, Option<String>) {
    let (raw_path, query) = match target.split_once('?') {
        Some((p, q)) => (p, Some(q.to_string())),
        None => (target, None),
    };

    let mut path = String::with_capacity(raw_path.len());
    for (i, seg) in raw_path.split('/').enumerate() {
        if i > 0 {
            path.push('/');
        }
        let seg = seg.split(';').next().unwrap_or("");
        path.push_str(&percent_decode_str(seg).decode_utf8_lossy());
    }
    (path, query)
}

/// Decodes an `application/x-www-form-urlencoded` string.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Applies the `_method=<m>` override a `POST` may carry in its query.
pub fn override_method(method: Method, query: Option<&str>) -> Method {
    if method != Method::POST {
        return method;
    }
    let Some(query) = query else {
        return method;
    };
    parse_query(query)
        .into_iter()
        .find(|(k, _)| k == "_method")
        .and_then(|(_, v)| Method::from_str(&v.to_ascii_uppercase()))
        .unwrap_or(method)
}
