//! Ordered middleware composition.

use std::sync::Arc;

use thiserror::Error;

use super::{ContextMiddleware, Middleware, Next};
use crate::{
    Request, Response, StatusCode,
    context::Context,
    handler::{BoxFuture, Handler, IntoContextHandler, IntoHandler},
};

/// Errors raised while composing a chain.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain has no middleware and no terminal handler")]
    MissingHandler,
}

/// A registered middleware, remembering which trait it came in through.
#[derive(Clone)]
enum Layer {
    Plain(Arc<dyn Middleware>),
    Context(Arc<dyn ContextMiddleware>),
}

impl Layer {
    /// Wraps `inner` so this layer runs first. A plain layer hands the
    /// incoming context to `next` untouched.
    fn wrap(&self, inner: Handler) -> Handler {
        match self {
            Layer::Plain(mw) => {
                let mw = Arc::clone(mw);
                Arc::new(move |ctx: Context, req: Request| {
                    mw.handle(req, Next::new(Arc::clone(&inner), ctx))
                })
            }
            Layer::Context(mw) => {
                let mw = Arc::clone(mw);
                Arc::new(move |ctx: Context, req: Request| {
                    mw.handle(ctx.clone(), req, Next::new(Arc::clone(&inner), ctx))
                })
            }
        }
    }
}

/// An ordered list of middleware, composed around terminal handlers.
///
/// The first middleware registered is the outermost: it runs first on the way
/// in and last on the way out. For `[m0, m1, m2]` and terminal `h` the
/// composed handler is `m0(m1(m2(h)))`.
///
/// Build the chain once at startup. Composing does not call any handler, and
/// composing the same chain with the same terminal always produces a handler
/// with identical behaviour.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use ravel::{Request, Response, StatusCode};
/// use ravel::middleware::{Chain, LoggerMiddleware, TimeoutMiddleware};
///
/// let mut chain = Chain::new();
/// chain
///     .use_middleware(LoggerMiddleware)
///     .use_context(TimeoutMiddleware::new(Duration::from_secs(2)));
///
/// let handler = chain.handler(|_req: Request| async {
///     Response::new(StatusCode::Ok).body("normal")
/// });
/// # let _ = handler;
/// ```
#[derive(Clone, Default)]
pub struct Chain {
    layers: Vec<Layer>,
}

impl Chain {
    /// Create an empty chain. Composing it around a terminal yields the
    /// terminal's behaviour unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ravel::middleware::Chain;
    ///
    /// let chain = Chain::new();
    /// assert!(chain.is_empty());
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware that does not touch the context. Registering the
    /// same middleware twice runs it twice.
    ///
    /// # Arguments
    ///
    /// - `middleware` — Any [`Middleware`], including an async
    ///   `Fn(Request, Next)` closure.
    ///
    /// # Returns
    ///
    /// `&mut Self`, so registrations can be chained.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ravel::Request;
    /// use ravel::middleware::{Chain, Next};
    ///
    /// let mut chain = Chain::new();
    /// chain.use_middleware(|req: Request, next: Next| async move {
    ///     let mut res = next.run(req).await;
    ///     res.add_header("X-Served-By", "ravel");
    ///     res
    /// });
    /// assert_eq!(chain.len(), 1);
    /// ```
    pub fn use_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.layers.push(Layer::Plain(Arc::new(middleware)));
        self
    }

    /// Appends a context-carrying middleware. Interleaves freely with
    /// [`use_middleware`](Self::use_middleware) entries.
    ///
    /// The middleware receives the incoming [`Context`] and decides which
    /// context the rest of the chain sees, typically by deriving one and
    /// calling [`Next::run_with`].
    ///
    /// # Arguments
    ///
    /// - `middleware` — Any [`ContextMiddleware`], including an async
    ///   `Fn(Context, Request, Next)` closure.
    pub fn use_context(&mut self, middleware: impl ContextMiddleware + 'static) -> &mut Self {
        self.layers.push(Layer::Context(Arc::new(middleware)));
        self
    }

    /// Number of registered middleware.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if no middleware has been registered.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Composes the chain around a handler that ignores the context.
    ///
    /// # Arguments
    ///
    /// - `terminal` — Async `Fn(Request) -> Response`.
    ///
    /// # Returns
    ///
    /// A type-erased [`Handler`] ready for [`Router::get`](crate::Router::get)
    /// and friends. The chain itself can keep being reused.
    pub fn handler(&self, terminal: impl IntoHandler) -> Handler {
        self.compose(IntoHandler::into_handler(terminal))
    }

    /// Composes the chain around a context-aware handler.
    ///
    /// The terminal sees the context as left by the innermost context
    /// middleware, e.g. cancelled on client disconnect or carrying the
    /// timeout deadline.
    ///
    /// # Arguments
    ///
    /// - `terminal` — Async `Fn(Context, Request) -> Response`.
    pub fn handler_ctx(&self, terminal: impl IntoContextHandler) -> Handler {
        self.compose(IntoContextHandler::into_handler(terminal))
    }

    /// Composes the chain around an already type-erased terminal.
    ///
    /// Without a terminal, a non-empty chain ends in a `404 Not Found`
    /// handler; an empty chain has nothing to serve.
    ///
    /// # Errors
    ///
    /// [`ChainError::MissingHandler`] when the chain is empty and `terminal`
    /// is `None`.
    pub fn build(&self, terminal: Option<Handler>) -> Result<Handler, ChainError> {
        match terminal {
            Some(terminal) => Ok(self.compose(terminal)),
            None if self.is_empty() => Err(ChainError::MissingHandler),
            None => Ok(self.compose(Arc::new(|_ctx: Context, _req: Request| -> BoxFuture {
                Box::pin(async { Response::error(StatusCode::NotFound) })
            }))),
        }
    }

    /// Folds from the innermost layer outwards, so the first registration
    /// ends up on the outside.
    fn compose(&self, terminal: Handler) -> Handler {
        self.layers
            .iter()
            .rev()
            .fold(terminal, |inner, layer| layer.wrap(inner))
    }
}
