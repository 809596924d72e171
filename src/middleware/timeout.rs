use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;

use super::{ContextMiddleware, Next};
use crate::{
    Request, Response, StatusCode, context::Context, handler::BoxFuture,
    report::take_panic_details,
};

/// Bounds how long downstream may take.
///
/// Downstream runs with a context whose deadline is `now + timeout` (or the
/// parent's, if that is earlier). If it has not answered by then the client
/// gets `503 Service Unavailable` right away. The unfinished work is not
/// aborted: it moves to a background task, its context reports
/// [`DeadlineExceeded`](crate::context::ContextError::DeadlineExceeded), and
/// whatever it eventually returns is discarded.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutMiddleware {
    timeout: Duration,
}

impl TimeoutMiddleware {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl ContextMiddleware for TimeoutMiddleware {
    fn handle(&self, ctx: Context, req: Request, next: Next) -> BoxFuture {
        let timeout = self.timeout;
        Box::pin(async move {
            let deadline = Instant::now() + timeout;
            let (ctx, guard) = ctx.with_deadline(deadline);
            let effective = ctx.deadline().unwrap_or(deadline);
            let url = req.url();

            let mut downstream = Box::pin(next.run_with(ctx, req));
            match tokio::time::timeout_at(effective, &mut downstream).await {
                Ok(response) => response,
                Err(_) => {
                    tracing::warn!(%url, ?timeout, "request timed out");
                    tokio::spawn(async move {
                        let outcome = AssertUnwindSafe(downstream).catch_unwind().await;
                        drop(guard);
                        if outcome.is_err() {
                            let _ = take_panic_details();
                            tracing::warn!(%url, "handler panicked after its request timed out");
                        }
                    });
                    Response::error(StatusCode::ServiceUnavailable)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::oneshot;

    use super::*;
    use crate::{Method, context::ContextError, middleware::Chain};

    fn get() -> Request {
        Request::new(Method::Get, "/slow")
    }

    #[tokio::test(start_paused = true)]
    async fn fast_downstream_keeps_its_response() {
        let mut chain = Chain::new();
        chain.use_context(TimeoutMiddleware::new(Duration::from_secs(2)));
        let handler = chain.handler(|_req: Request| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Response::new(StatusCode::Ok).body("normal")
        });

        let res = handler(Context::background(), get()).await;

        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.body_bytes(), b"normal");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_downstream_gets_503_at_the_deadline() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut chain = Chain::new();
        chain.use_context(TimeoutMiddleware::new(Duration::from_secs(2)));
        let handler = chain.handler({
            let finished = Arc::clone(&finished);
            move |_req: Request| {
                let finished = Arc::clone(&finished);
                async move {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    finished.store(true, Ordering::SeqCst);
                    Response::new(StatusCode::Ok).body("too late")
                }
            }
        });

        let started = Instant::now();
        let res = handler(Context::background(), get()).await;
        let waited = started.elapsed();

        assert_eq!(res.status(), StatusCode::ServiceUnavailable);
        assert_eq!(res.body_bytes(), b"Service Unavailable");
        assert!(waited >= Duration::from_secs(2));
        assert!(waited < Duration::from_secs(3));
        assert!(!finished.load(Ordering::SeqCst));

        // Detached, not aborted.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cooperative_handler_sees_deadline_exceeded() {
        let (tx, rx) = oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        let mut chain = Chain::new();
        chain.use_context(TimeoutMiddleware::new(Duration::from_secs(2)));
        let handler = chain.handler_ctx(move |ctx: Context, _req: Request| {
            let tx = tx.lock().unwrap().take();
            async move {
                let err = ctx.done().await;
                if let Some(tx) = tx {
                    let _ = tx.send(err);
                }
                // Wind-down still overruns the deadline.
                tokio::time::sleep(Duration::from_millis(500)).await;
                Response::new(StatusCode::Ok)
            }
        });

        let res = handler(Context::background(), get()).await;

        assert_eq!(res.status(), StatusCode::ServiceUnavailable);
        assert_eq!(rx.await.unwrap(), ContextError::DeadlineExceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_parent_deadline_wins() {
        let mut chain = Chain::new();
        chain.use_context(TimeoutMiddleware::new(Duration::from_secs(5)));
        let handler = chain.handler(|_req: Request| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Response::new(StatusCode::Ok)
        });

        let (parent, _guard) = Context::background().with_timeout(Duration::from_secs(1));
        let started = Instant::now();
        let res = handler(parent, get()).await;

        assert_eq!(res.status(), StatusCode::ServiceUnavailable);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
