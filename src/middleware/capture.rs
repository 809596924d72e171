use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use super::{Middleware, Next};
use crate::{
    Request, Response, StatusCode,
    handler::BoxFuture,
    report::{CrashReporter, HttpInterface, Report, panic_message, take_panic_details},
};

/// Turns a panic anywhere downstream into a `500 Internal Server Error` and
/// one crash report.
///
/// Every poll of the downstream future runs under `catch_unwind`, so panics
/// after an `.await` are caught as well as synchronous ones. The client only
/// ever sees the canonical reason phrase; the panic text, location and
/// backtrace go to the log and the [`CrashReporter`].
///
/// Register it first so it is outermost and sees every panic exactly once.
#[derive(Debug, Clone)]
pub struct CaptureMiddleware {
    reporter: CrashReporter,
}

impl CaptureMiddleware {
    pub fn new(reporter: CrashReporter) -> Self {
        Self { reporter }
    }
}

impl Middleware for CaptureMiddleware {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let reporter = self.reporter.clone();
        Box::pin(async move {
            let interface = HttpInterface::from_request(&req);

            match AssertUnwindSafe(next.run(req)).catch_unwind().await {
                Ok(response) => response,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    let details = take_panic_details();

                    tracing::error!(
                        method = %interface.method,
                        url = %interface.url,
                        location = details.as_ref().and_then(|d| d.location.as_deref()),
                        "handler panicked: {message}"
                    );
                    if let Some(details) = &details {
                        tracing::error!("{}", details.backtrace);
                    }

                    reporter.capture(Report::new(message, interface).with_panic(details));
                    Response::error(StatusCode::InternalServerError)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;
    use crate::{Method, context::Context, middleware::Chain};

    fn passthrough(req: Request, next: Next) -> impl Future<Output = Response> + Send {
        next.run(req)
    }

    async fn explode(message: String) -> Response {
        panic!("{message}")
    }

    #[tokio::test]
    async fn panic_becomes_500_without_leaking_text() {
        let (reporter, mut rx) = CrashReporter::channel(8);
        let mut chain = Chain::new();
        chain.use_middleware(CaptureMiddleware::new(reporter));
        let handler = chain.handler(|_req: Request| {
            explode("error for sentry: from panicHandler".into())
        });

        let res = handler(Context::background(), Request::new(Method::Get, "/panic")).await;

        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert_eq!(res.body_bytes(), b"Internal Server Error");

        let report = rx.try_recv().unwrap();
        assert_eq!(report.message, "error for sentry: from panicHandler");
        assert_eq!(report.request.url, "/panic");
    }

    #[tokio::test]
    async fn one_report_through_many_inner_layers() {
        let (reporter, mut rx) = CrashReporter::channel(8);
        let mut chain = Chain::new();
        chain
            .use_middleware(CaptureMiddleware::new(reporter))
            .use_middleware(passthrough)
            .use_middleware(passthrough)
            .use_middleware(passthrough);
        let handler = chain.handler(|_req: Request| async {
            tokio::task::yield_now().await;
            explode("after an await".into()).await
        });

        let res = handler(Context::background(), Request::new(Method::Get, "/")).await;

        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert_eq!(rx.try_recv().unwrap().message, "after an await");
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn inner_capture_stops_the_unwind() {
        let (reporter, mut rx) = CrashReporter::channel(8);
        let mut chain = Chain::new();
        chain
            .use_middleware(CaptureMiddleware::new(reporter.clone()))
            .use_middleware(CaptureMiddleware::new(reporter));
        let handler = chain.handler(|_req: Request| explode("once".into()));

        handler(Context::background(), Request::new(Method::Get, "/")).await;

        assert!(rx.try_recv().is_ok());
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn panicking_middleware_is_caught_too() {
        let (reporter, mut rx) = CrashReporter::channel(8);
        let mut chain = Chain::new();
        chain
            .use_middleware(CaptureMiddleware::new(reporter))
            .use_middleware(|req: Request, _next: Next| {
                explode(format!("middleware broke on {}", req.path()))
            });
        let handler = chain.handler(|_req: Request| async { Response::new(StatusCode::Ok) });

        let res = handler(Context::background(), Request::new(Method::Get, "/mw")).await;

        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert_eq!(rx.try_recv().unwrap().message, "middleware broke on /mw");
    }

    #[tokio::test]
    async fn normal_response_is_untouched() {
        let (reporter, mut rx) = CrashReporter::channel(8);
        let mut chain = Chain::new();
        chain.use_middleware(CaptureMiddleware::new(reporter));
        let handler = chain.handler(|_req: Request| async {
            Response::new(StatusCode::Ok).header("X-Id", "7").body("normal")
        });

        let res = handler(Context::background(), Request::new(Method::Get, "/normal")).await;

        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.headers().get("X-Id"), Some("7"));
        assert_eq!(res.body_bytes(), b"normal");
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }
}
