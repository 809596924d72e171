use std::sync::Arc;

use tokio::time::Instant;

use super::{Middleware, Next};
use crate::{Request, apm::HttpTimer, handler::BoxFuture};

/// Records how long everything downstream took into an [`HttpTimer`].
///
/// Every completed request is recorded whatever its status. A panic that
/// unwinds through this layer is not.
#[derive(Debug, Clone)]
pub struct TimingMiddleware {
    timer: Arc<HttpTimer>,
}

impl TimingMiddleware {
    pub fn new(timer: Arc<HttpTimer>) -> Self {
        Self { timer }
    }
}

impl Middleware for TimingMiddleware {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let timer = Arc::clone(&self.timer);
        Box::pin(async move {
            let start = Instant::now();
            let response = next.run(req).await;
            timer.update_since(start);
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        Method, Response, StatusCode,
        context::Context,
        middleware::{CaptureMiddleware, Chain},
        report::CrashReporter,
    };

    #[tokio::test(start_paused = true)]
    async fn sample_covers_downstream_and_response_is_unchanged() {
        let timer = Arc::new(HttpTimer::new());
        let mut chain = Chain::new();
        chain.use_middleware(TimingMiddleware::new(Arc::clone(&timer)));
        let handler = chain.handler(|_req: Request| async {
            tokio::time::sleep(Duration::from_millis(250)).await;
            Response::new(StatusCode::Ok).body("normal")
        });

        let res = handler(Context::background(), Request::new(Method::Get, "/normal")).await;

        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.body_bytes(), b"normal");
        let snap = timer.snapshot();
        assert_eq!(snap.count, 1);
        assert!(snap.max >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn error_statuses_are_recorded() {
        let timer = Arc::new(HttpTimer::new());
        let mut chain = Chain::new();
        chain.use_middleware(TimingMiddleware::new(Arc::clone(&timer)));
        let handler =
            chain.handler(|_req: Request| async { Response::error(StatusCode::ServiceUnavailable) });

        handler(Context::background(), Request::new(Method::Get, "/")).await;
        handler(Context::background(), Request::new(Method::Get, "/")).await;

        assert_eq!(timer.count(), 2);
    }

    #[tokio::test]
    async fn unwinding_panic_skips_the_sample() {
        let timer = Arc::new(HttpTimer::new());
        let (reporter, _rx) = CrashReporter::channel(4);
        let mut chain = Chain::new();
        chain
            .use_middleware(CaptureMiddleware::new(reporter))
            .use_middleware(TimingMiddleware::new(Arc::clone(&timer)));
        let handler = chain.handler(|_req: Request| boom());

        let res = handler(Context::background(), Request::new(Method::Get, "/panic")).await;

        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert_eq!(timer.count(), 0);
    }

    async fn boom() -> Response {
        panic!("boom")
    }
}
