use super::{ContextMiddleware, Next};
use crate::{Request, context::Context, handler::BoxFuture};

/// Cancels the request context when the client goes away.
///
/// Requests read by the [`Server`](crate::Server) carry a
/// [`CloseSignal`](crate::server::CloseSignal). This middleware derives a
/// cancellable child context, runs downstream with it, and cancels it the
/// moment the peer closes the connection. Downstream keeps running and is
/// still awaited; handlers that care watch [`Context::done`].
///
/// Requests without a signal pass straight through.
#[derive(Debug, Default, Clone, Copy)]
pub struct CloseMiddleware;

impl ContextMiddleware for CloseMiddleware {
    fn handle(&self, ctx: Context, req: Request, next: Next) -> BoxFuture {
        Box::pin(async move {
            let Some(mut signal) = req.close_signal() else {
                return next.run(req).await;
            };

            let (ctx, guard) = ctx.with_cancel();
            let downstream = next.run_with(ctx, req);
            tokio::pin!(downstream);

            tokio::select! {
                biased;
                response = &mut downstream => return response,
                () = signal.closed() => {
                    guard.cancel();
                    tracing::debug!("peer closed connection, request context canceled");
                }
            }

            downstream.await
        })
    }
}
