//! Middleware — composable logic around a [`Handler`](crate::handler::Handler).
//!
//! A middleware receives the request and a [`Next`] that stands for everything
//! registered after it, terminal handler included. It may run code before
//! `next.run(req)`, after it, or instead of it.
//!
//! Two shapes exist:
//!
//! - [`Middleware`] — sees only the request. The current [`Context`] rides
//!   along inside `Next` untouched.
//! - [`ContextMiddleware`] — also receives the context and may derive a new one
//!   (shorter deadline, extra cancellation source) for everything downstream
//!   via [`Next::run_with`].
//!
//! [`Chain`] composes both kinds, in registration order, around a terminal.
//!
//! ## Built-in middleware
//!
//! | Type                   | Shape   | Purpose                                         |
//! |------------------------|---------|-------------------------------------------------|
//! | [`CaptureMiddleware`]  | plain   | panic → 500 + crash report                      |
//! | [`TimingMiddleware`]   | plain   | request duration → [`HttpTimer`](crate::apm::HttpTimer) |
//! | [`LoggerMiddleware`]   | plain   | one log line per request                        |
//! | [`CloseMiddleware`]    | context | cancel the context when the peer disconnects    |
//! | [`TimeoutMiddleware`]  | context | deadline + 503 when downstream is too slow      |

use std::future::Future;

use crate::{
    Request, Response,
    context::Context,
    handler::{BoxFuture, Handler},
};

mod capture;
mod chain;
mod close;
mod logger;
mod timeout;
mod timing;

pub use capture::CaptureMiddleware;
pub use chain::{Chain, ChainError};
pub use close::CloseMiddleware;
pub use logger::LoggerMiddleware;
pub use timeout::TimeoutMiddleware;
pub use timing::TimingMiddleware;

/// Everything downstream of the current middleware, bound to the request's
/// context.
///
/// Consumed by [`run`](Self::run) or [`run_with`](Self::run_with), so a
/// middleware forwards a request at most once. Downstream code is not invoked
/// until the returned future is first polled.
pub struct Next {
    inner: Handler,
    ctx: Context,
}

impl Next {
    pub(crate) fn new(inner: Handler, ctx: Context) -> Self {
        Self { inner, ctx }
    }

    /// The context downstream will receive from [`run`](Self::run).
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Forwards `req` with the current context.
    pub async fn run(self, req: Request) -> Response {
        (self.inner)(self.ctx, req).await
    }

    /// Forwards `req` with `ctx` in place of the current context. `ctx` should
    /// be derived from [`context`](Self::context).
    pub async fn run_with(self, ctx: Context, req: Request) -> Response {
        (self.inner)(ctx, req).await
    }
}

/// Middleware that does not touch the context.
///
/// Closures `Fn(Request, Next) -> impl Future<Output = Response>` implement it:
///
/// ```rust
/// use ravel::{Request, middleware::{Chain, Next}};
///
/// let mut chain = Chain::new();
/// chain.use_middleware(|req: Request, next: Next| async move {
///     let mut res = next.run(req).await;
///     res.add_header("X-Served-By", "ravel");
///     res
/// });
/// ```
pub trait Middleware: Send + Sync {
    fn handle(&self, req: Request, next: Next) -> BoxFuture;
}

impl<T, F> Middleware for T
where
    T: Fn(Request, Next) -> F + Send + Sync,
    F: Future<Output = Response> + Send + 'static,
{
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        Box::pin((self)(req, next))
    }
}

/// Middleware that may derive the context seen downstream.
///
/// `ctx` is the same value as `next.context()`, passed separately for
/// convenience. Closures `Fn(Context, Request, Next) -> impl Future<Output = Response>`
/// implement it.
pub trait ContextMiddleware: Send + Sync {
    fn handle(&self, ctx: Context, req: Request, next: Next) -> BoxFuture;
}

impl<T, F> ContextMiddleware for T
where
    T: Fn(Context, Request, Next) -> F + Send + Sync,
    F: Future<Output = Response> + Send + 'static,
{
    fn handle(&self, ctx: Context, req: Request, next: Next) -> BoxFuture {
        Box::pin((self)(ctx, req, next))
    }
}
