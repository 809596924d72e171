use tokio::time::Instant;

use super::{Middleware, Next};
use crate::{Request, handler::BoxFuture};

/// Logs one line per request: method, URL and the time spent downstream.
///
/// ```text
/// [GET] "/normal?x=1" 1.21ms
/// ```
///
/// The line is emitted after the downstream call returns, so it covers every
/// middleware registered after this one plus the terminal handler. The
/// response is returned untouched. A panic unwinding through this middleware
/// skips the line; the capture middleware logs those.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        Box::pin(async move {
            let start = Instant::now();
            let method = req.method().clone();
            let url = req.url();

            let response = next.run(req).await;

            let elapsed = start.elapsed();
            tracing::info!(
                %method,
                %url,
                status = response.status().as_u16(),
                ?elapsed,
                "[{}] {:?} {:?}",
                method,
                url,
                elapsed
            );

            response
        })
    }
}
