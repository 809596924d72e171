//! Request routing — map a method and a URL pattern to a composed [`Handler`].
//!
//! | Pattern        | Matches                  | Captures                        |
//! |----------------|--------------------------|---------------------------------|
//! | `/normal`      | `/normal`                | *(none)*                        |
//! | `/users/:id`   | `/users/42`              | `id → "42"`                     |
//! | `/files/*`     | `/files/docs/readme.txt` | `wildcard → "/docs/readme.txt"` |
//!
//! Trailing slashes are ignored on both sides. Routes are tried in
//! registration order and the first match wins; no match answers
//! `404 Not Found`.
//!
//! The router stores handlers already wrapped by a
//! [`Chain`](crate::middleware::Chain), so each route decides its own
//! middleware.

use std::collections::HashMap;

use crate::{Method, Request, Response, StatusCode, context::Context, handler::Handler};

type Params = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Segments(Vec<Segment>),
    /// Everything under a prefix; the remainder is captured as `wildcard`.
    Prefix(String),
}

/// Strips one trailing `/`, except from the root path itself.
fn trim_trailing_slash(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ => path,
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl Pattern {
    /// Compile a route pattern string into a `Pattern`.
    ///
    /// Checked in order:
    ///
    /// 1. Ends with `/*` → [`Pattern::Prefix`], matching the prefix itself and
    ///    anything below it.
    /// 2. Otherwise → [`Pattern::Segments`], where `:name` segments capture
    ///    and every other segment must match literally.
    ///
    /// A trailing slash (other than on the root `/`) is stripped first, so
    /// `/users/` and `/users` compile to the same pattern.
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);
        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Pattern::Prefix(prefix.to_owned());
        }
        Pattern::Segments(
            split_segments(pattern)
                .map(|s| match s.strip_prefix(':') {
                    Some(name) => Segment::Param(name.to_owned()),
                    None => Segment::Literal(s.to_owned()),
                })
                .collect(),
        )
    }

    /// Test `path` against this pattern.
    ///
    /// # Returns
    ///
    /// `Some(params)` with every capture on a match (empty for literal
    /// patterns), `None` otherwise.
    fn matches(&self, path: &str) -> Option<Params> {
        let path = trim_trailing_slash(path);
        match self {
            Pattern::Prefix(prefix) => {
                let rest = path.strip_prefix(prefix.as_str())?;
                if !rest.is_empty() && !rest.starts_with('/') {
                    return None;
                }
                Some(Params::from([("wildcard".to_owned(), rest.to_owned())]))
            }
            Pattern::Segments(segments) => {
                let mut params = Params::new();
                let mut parts = split_segments(path);
                for segment in segments {
                    let part = parts.next()?;
                    match segment {
                        Segment::Literal(lit) if lit != part => return None,
                        Segment::Literal(_) => {}
                        Segment::Param(name) => {
                            params.insert(name.clone(), part.to_owned());
                        }
                    }
                }
                parts.next().is_none().then_some(params)
            }
        }
    }
}

/// One registered entry: a method, a compiled pattern and the composed
/// handler to run on a match.
struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

/// HTTP request router that dispatches requests to composed handlers.
///
/// Routes are evaluated in registration order; the first route whose method
/// and pattern both match the request runs. When nothing matches, the router
/// answers `404 Not Found` itself, outside any middleware chain.
///
/// Handlers are registered already wrapped, typically by
/// [`Chain::handler`](crate::middleware::Chain::handler) or
/// [`Chain::handler_ctx`](crate::middleware::Chain::handler_ctx).
///
/// # Examples
///
/// ```rust
/// use ravel::{Request, Response, Router, StatusCode};
/// use ravel::middleware::Chain;
///
/// let chain = Chain::new();
/// let mut router = Router::new();
/// router.get("/users/:id", chain.handler(|req: Request| async move {
///     let id = req.param("id").unwrap_or_default().to_owned();
///     Response::new(StatusCode::Ok).body(id)
/// }));
/// assert_eq!(router.len(), 1);
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Create a new, empty `Router` with no registered routes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ravel::Router;
    ///
    /// let router = Router::new();
    /// assert!(router.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `GET` requests matching `pattern`.
    ///
    /// # Arguments
    ///
    /// - `pattern` — URL pattern, e.g. `"/normal"`, `"/users/:id"` or `"/files/*"`.
    /// - `handler` — Composed handler, usually from a [`Chain`](crate::middleware::Chain).
    ///
    /// # Returns
    ///
    /// `&mut Self`, so registrations can be chained.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ravel::{Request, Response, Router, StatusCode};
    /// use ravel::middleware::Chain;
    ///
    /// let chain = Chain::new();
    /// let mut router = Router::new();
    /// router
    ///     .get("/normal", chain.handler(|_req: Request| async {
    ///         Response::new(StatusCode::Ok).body("normal")
    ///     }))
    ///     .get("/health", chain.handler(|_req: Request| async {
    ///         Response::new(StatusCode::NoContent)
    ///     }));
    /// assert_eq!(router.len(), 2);
    /// ```
    pub fn get(&mut self, pattern: &str, handler: Handler) -> &mut Self {
        self.on(Method::Get, pattern, handler)
    }

    /// Register a handler for `POST` requests matching `pattern`.
    ///
    /// # Arguments
    ///
    /// - `pattern` — URL pattern, e.g. `"/echo"` or `"/users/:id"`.
    /// - `handler` — Composed handler, usually from a [`Chain`](crate::middleware::Chain).
    pub fn post(&mut self, pattern: &str, handler: Handler) -> &mut Self {
        self.on(Method::Post, pattern, handler)
    }

    /// Register a handler for an arbitrary method.
    ///
    /// [`get`](Self::get) and [`post`](Self::post) are shorthands for this.
    /// Registering the same method and pattern twice keeps both entries; the
    /// earlier one always wins.
    ///
    /// # Arguments
    ///
    /// - `method` — Method the request must carry.
    /// - `pattern` — URL pattern, compiled once here.
    /// - `handler` — Composed handler to run on a match.
    pub fn on(&mut self, method: Method, pattern: &str, handler: Handler) -> &mut Self {
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(pattern),
            handler,
        });
        self
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatch `request` to the first matching route.
    ///
    /// Path captures are attached to the request before the handler runs, so
    /// handlers read them with [`Request::param`].
    ///
    /// # Arguments
    ///
    /// - `ctx` — Root context for the request; the server passes
    ///   [`Context::background`].
    /// - `request` — The parsed request.
    ///
    /// # Returns
    ///
    /// The handler's response, or `404 Not Found` when no route matches.
    pub async fn route(&self, ctx: Context, mut request: Request) -> Response {
        let matched = self.routes.iter().find_map(|route| {
            if &route.method != request.method() {
                return None;
            }
            route.pattern.matches(request.path()).map(|params| (route, params))
        });

        match matched {
            Some((route, params)) => {
                request.set_path_params(params);
                (route.handler)(ctx, request).await
            }
            None => Response::error(StatusCode::NotFound),
        }
    }
}
