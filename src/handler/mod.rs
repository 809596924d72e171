//! Handler shapes and type erasure.
//!
//! Every route ends in a [`Handler`]: a shared, type-erased function from a
//! [`Context`] and a [`Request`] to a boxed response future. Two conversion
//! traits let callers write ordinary async closures instead:
//!
//! - [`IntoHandler`] — `Fn(Request) -> impl Future<Output = Response>`; the
//!   context is dropped before the call.
//! - [`IntoContextHandler`] — `Fn(Context, Request) -> impl Future<Output = Response>`.
//!
//! [`Chain::handler`](crate::middleware::Chain::handler) and
//! [`Chain::handler_ctx`](crate::middleware::Chain::handler_ctx) accept either
//! shape and return a [`Handler`], which is what the router stores.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{Request, Response, context::Context};

/// Heap-allocated response future. `Send + 'static` so the server can drive it
/// on any worker thread and the timeout middleware can detach it.
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Type-erased handler shared by every request on a route.
pub type Handler = Arc<dyn Fn(Context, Request) -> BoxFuture + Send + Sync + 'static>;

/// Conversion for handlers that ignore the context.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, req: Request) -> BoxFuture;

    fn into_handler(self) -> Handler
    where
        Self: Sized,
    {
        Arc::new(move |_ctx: Context, req: Request| self.call(req))
    }
}

impl<T, F> IntoHandler for T
where
    T: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        Box::pin((self)(req))
    }
}

/// Conversion for handlers that observe the context.
pub trait IntoContextHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context, req: Request) -> BoxFuture;

    fn into_handler(self) -> Handler
    where
        Self: Sized,
    {
        Arc::new(move |ctx: Context, req: Request| self.call(ctx, req))
    }
}

impl<T, F> IntoContextHandler for T
where
    T: Fn(Context, Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context, req: Request) -> BoxFuture {
        Box::pin((self)(ctx, req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Method, StatusCode};

    #[tokio::test]
    async fn plain_closure_ignores_context() {
        let handler = IntoHandler::into_handler(|req: Request| async move {
            Response::new(StatusCode::Ok).body(req.path().to_owned())
        });
        let res = handler(Context::background(), Request::new(Method::Get, "/normal")).await;
        assert_eq!(res.body_bytes(), b"/normal");
    }

    #[tokio::test]
    async fn context_closure_sees_context() {
        let handler = IntoContextHandler::into_handler(|ctx: Context, _req: Request| async move {
            let user = ctx.value::<&'static str>().copied().unwrap_or("anonymous");
            Response::new(StatusCode::Ok).body(user)
        });
        let ctx = Context::background().with_value("alice");
        let res = handler(ctx, Request::new(Method::Get, "/")).await;
        assert_eq!(res.body_bytes(), b"alice");
    }
}
