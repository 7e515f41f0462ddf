//! Request routing.
//!
//! Routes are kept in one ordered table per method. Each entry splits its
//! path into a literal prefix and a [`SuffixPattern`](pattern::SuffixPattern);
//! lookup walks the table and returns the first entry whose prefix, suffix
//! and content negotiation all accept the request.
//!
//! Most callers declare routes through [`RouteTable`], which joins scopes,
//! splits paths and orders prefixes so that longer literals are tried before
//! the shorter ones they extend.

pub mod pattern;
pub mod router;

use thiserror::Error;
use tracing::info;

use crate::http::request::Method;
pub use pattern::{Capture, Conversion, SuffixPattern};
pub use router::{DEFAULT_FORMAT, Route, RouteInfo, RouteMatch, Router};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("pattern {pattern:?} has {captures} capture groups but {conversions} conversions")]
    CaptureMismatch {
        pattern: String,
        captures: usize,
        conversions: usize,
    },
    #[error("bad pattern {pattern:?}: {reason}")]
    BadPattern { pattern: String, reason: String },
    #[error("bad route path {0:?}")]
    BadPath(String),
}

/// Splits a full route path into its literal prefix and suffix pattern.
///
/// A trailing `/` is dropped (except for the root path) and the split happens
/// at the first `%` that is not part of a `%%` escape.
pub fn analyse_path(path: &str) -> Result<(String, String), RouteError> {
    if !path.starts_with('/') || path.contains('\n') {
        return Err(RouteError::BadPath(path.to_string()));
    }
    let path = if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    };

    let bytes = path.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if bytes.get(i + 1) == Some(&b'%') {
                i += 2;
                continue;
            }
            let prefix = path[..i].replace("%%", "%");
            return Ok((prefix, path[i..].to_string()));
        }
        i += 1;
    }
    Ok((path.replace("%%", "%"), String::new()))
}

/// One declared route, relative to its scope.
pub struct RouteDef<H> {
    pub method: Method,
    pub scope: String,
    pub path: String,
    pub handler: H,
    pub id: Option<String>,
    pub accept_exts: Vec<String>,
}

/// Declarative route list, compiled into a [`Router`].
pub struct RouteTable<H> {
    scope: String,
    defs: Vec<RouteDef<H>>,
}

impl<H> Default for RouteTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> RouteTable<H> {
    pub fn new() -> Self {
        Self {
            scope: "/".to_string(),
            defs: Vec::new(),
        }
    }

    /// Sets the scope later declarations are mounted under.
    pub fn scope(mut self, scope: &str) -> Self {
        self.scope = scope.to_string();
        self
    }

    pub fn get(self, path: &str, handler: H) -> Self {
        self.route(Method::GET, path, handler, &[])
    }

    pub fn post(self, path: &str, handler: H) -> Self {
        self.route(Method::POST, path, handler, &[])
    }

    pub fn put(self, path: &str, handler: H) -> Self {
        self.route(Method::PUT, path, handler, &[])
    }

    pub fn delete(self, path: &str, handler: H) -> Self {
        self.route(Method::DELETE, path, handler, &[])
    }

    pub fn route(mut self, method: Method, path: &str, handler: H, accept_exts: &[&str]) -> Self {
        let scope = self.scope.clone();
        self.defs.push(RouteDef {
            method,
            scope,
            path: path.to_string(),
            handler,
            id: None,
            accept_exts: accept_exts.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn add(&mut self, def: RouteDef<H>) {
        self.defs.push(def);
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Builds the route entries, ordered by descending prefix. Entries with
    /// equal prefixes keep declaration order.
    pub fn build(self) -> Result<Vec<Route<H>>, RouteError> {
        let mut routes = Vec::with_capacity(self.defs.len());
        for def in self.defs {
            let full = join_scope(&def.scope, &def.path);
            let (prefix, suffix) = analyse_path(&full)?;
            let suffix = SuffixPattern::compile(&suffix)?;

            let mut route = Route::new(def.method, &prefix, suffix, def.handler)
                .accept_exts(def.accept_exts);
            route.scope = def.scope;
            route.id = def.id.unwrap_or_else(|| format!("{} {}", def.method, full));
            routes.push(route);
        }
        routes.sort_by(|a, b| b.prefix.cmp(&a.prefix));
        Ok(routes)
    }

    /// Builds and registers every route into a fresh router.
    pub fn compile(self) -> Result<Router<H>, RouteError> {
        let mut router = Router::new();
        for route in self.build()? {
            router.register(route)?;
        }
        info!(routes = router.len(), "routes compiled");
        Ok(router)
    }
}

fn join_scope(scope: &str, path: &str) -> String {
    let scope = scope.strip_suffix('/').unwrap_or(scope);
    format!("{scope}{path}")
}
