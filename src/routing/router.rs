use std::collections::HashSet;

use tracing::debug;

use crate::http::mime::{MimeTriple, negotiate};
use crate::http::request::Method;
use crate::routing::RouteError;
use crate::routing::pattern::{Capture, Conversion, SuffixPattern, parse_format_ext};

/// Format used when a route offers no negotiation table.
pub const DEFAULT_FORMAT: &str = "html";

/// Registration input for one route.
#[derive(Debug, Clone)]
pub struct Route<H> {
    pub method: Method,
    pub prefix: String,
    pub suffix: SuffixPattern,
    pub conversions: Vec<Conversion>,
    pub handler: H,
    pub id: String,
    pub scope: String,
    pub accept_exts: Option<Vec<String>>,
    pub accept_mimes: Option<Vec<MimeTriple>>,
}

impl<H> Route<H> {
    /// A route whose conversions follow its placeholders.
    pub fn new(method: Method, prefix: &str, suffix: SuffixPattern, handler: H) -> Self {
        let conversions = suffix.natural_conversions();
        Self {
            method,
            id: format!("{} {}{}", method, prefix, suffix.source()),
            prefix: prefix.to_string(),
            suffix,
            conversions,
            handler,
            scope: String::new(),
            accept_exts: None,
            accept_mimes: None,
        }
    }

    /// Restricts the route to the given format extensions. The negotiation
    /// table is derived from the extensions with a known MIME type.
    pub fn accept_exts<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let exts: Vec<String> = exts.into_iter().map(Into::into).collect();
        if exts.is_empty() {
            self.accept_exts = None;
            self.accept_mimes = None;
        } else {
            self.accept_mimes = Some(exts.iter().filter_map(|e| MimeTriple::for_ext(e)).collect());
            self.accept_exts = Some(exts);
        }
        self
    }
}

struct RouteEntry<H> {
    /// This prefix is a leading substring of the previous entry's prefix.
    is_sub: bool,
    prefix: String,
    suffix: SuffixPattern,
    conversions: Vec<Conversion>,
    handler: H,
    id: String,
    scope: String,
    accept_exts: Option<HashSet<String>>,
    accept_mimes: Option<Vec<MimeTriple>>,
}

/// The outcome of a successful lookup.
#[derive(Debug)]
pub struct RouteMatch<'r, H> {
    pub handler: &'r H,
    pub id: &'r str,
    pub scope: &'r str,
    pub captures: Vec<Capture>,
    pub format: String,
}

/// Summary of a registered route, in table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: Method,
    pub prefix: String,
    pub suffix: String,
    pub id: String,
    pub scope: String,
    pub is_sub: bool,
}

/// Per-method ordered route tables.
pub struct Router<H> {
    tables: Vec<Vec<RouteEntry<H>>>,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Router<H> {
    pub fn new() -> Self {
        Self {
            tables: Method::ALL.iter().map(|_| Vec::new()).collect(),
        }
    }

    /// Appends a route to its method's table.
    pub fn register(&mut self, route: Route<H>) -> Result<(), RouteError> {
        let captures = route.suffix.capture_count();
        if captures != route.conversions.len() {
            return Err(RouteError::CaptureMismatch {
                pattern: route.suffix.source().to_string(),
                captures,
                conversions: route.conversions.len(),
            });
        }
        if route.prefix.contains('\n') {
            return Err(RouteError::BadPath(route.prefix));
        }

        let table = &mut self.tables[route.method.index()];
        let is_sub = table
            .last()
            .is_some_and(|prev| prev.prefix.starts_with(&route.prefix));

        debug!(id = %route.id, prefix = %route.prefix, is_sub, "route registered");
        table.push(RouteEntry {
            is_sub,
            prefix: route.prefix,
            suffix: route.suffix,
            conversions: route.conversions,
            handler: route.handler,
            id: route.id,
            scope: route.scope,
            accept_exts: route.accept_exts.map(|v| v.into_iter().collect()),
            accept_mimes: route.accept_mimes,
        });
        Ok(())
    }

    /// Removes every route.
    pub fn clear(&mut self) {
        for table in &mut self.tables {
            table.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.tables.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self, method: Method) -> Vec<RouteInfo> {
        self.tables[method.index()]
            .iter()
            .map(|e| RouteInfo {
                method,
                prefix: e.prefix.clone(),
                suffix: e.suffix.source().to_string(),
                id: e.id.clone(),
                scope: e.scope.clone(),
                is_sub: e.is_sub,
            })
            .collect()
    }

    /// Finds the first entry for `method` that accepts `path` and the
    /// client's preferences. `accept` is the parsed, ordered Accept list;
    /// empty means anything.
    pub fn lookup(&self, method: Method, path: &str, accept: &[String]) -> Option<RouteMatch<'_, H>> {
        let mut last_matched = false;

        for entry in &self.tables[method.index()] {
            let matched = (entry.is_sub && last_matched) || path.starts_with(&entry.prefix);
            last_matched = matched;
            if !matched {
                continue;
            }

            let rest = &path[entry.prefix.len()..];
            let (raw, ext) = if entry.suffix.is_empty() {
                if rest.is_empty() {
                    (Vec::new(), None)
                } else {
                    match parse_format_ext(rest) {
                        Some(ext) => (Vec::new(), Some(ext)),
                        None => continue,
                    }
                }
            } else {
                match entry.suffix.matches(rest, entry.accept_exts.is_some()) {
                    Some(m) => (m.captures, m.ext),
                    None => continue,
                }
            };

            let Some(format) = resolve_format(entry, ext, accept) else {
                continue;
            };

            let captures = raw
                .iter()
                .zip(&entry.conversions)
                .map(|(s, conv)| conv.apply(s))
                .collect();

            return Some(RouteMatch {
                handler: &entry.handler,
                id: &entry.id,
                scope: &entry.scope,
                captures,
                format,
            });
        }
        None
    }
}

fn resolve_format<H>(entry: &RouteEntry<H>, ext: Option<&str>, accept: &[String]) -> Option<String> {
    if let Some(ext) = ext {
        return match &entry.accept_exts {
            Some(allowed) if !allowed.contains(ext) => None,
            _ => Some(ext.to_string()),
        };
    }
    match &entry.accept_mimes {
        None => Some(DEFAULT_FORMAT.to_string()),
        Some(offered) if accept.is_empty() => offered.first().map(|t| t.format.clone()),
        Some(offered) => negotiate(accept, offered).map(str::to_string),
    }
}
