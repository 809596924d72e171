//! The demo service: four handlers behind the full middleware chain.
//!
//! | Route             | Handler              | Answer                        |
//! |-------------------|----------------------|-------------------------------|
//! | `/normal`         | [`normal`]           | 200 `normal`                  |
//! | `/panic`          | [`panicking`]        | 500 `Internal Server Error`   |
//! | `/context/normal` | [`context_normal`]   | 200 `normal with context`     |
//! | `/context/panic`  | [`context_panicking`]| 500 `Internal Server Error`   |

use std::error::Error;
use std::panic;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    Request, Response, Router, StatusCode,
    apm::HttpTimer,
    context::Context,
    middleware::{
        CaptureMiddleware, Chain, CloseMiddleware, LoggerMiddleware, TimeoutMiddleware,
        TimingMiddleware,
    },
    report::CrashReporter,
};

type BoxError = Box<dyn Error + Send + Sync>;

pub async fn normal(_req: Request) -> Response {
    Response::new(StatusCode::Ok).body("normal")
}

pub async fn panicking(_req: Request) -> Response {
    panic::panic_any(BoxError::from("error for sentry: from panicHandler"))
}

pub async fn context_normal(_ctx: Context, _req: Request) -> Response {
    Response::new(StatusCode::Ok).body("normal with context")
}

pub async fn context_panicking(_ctx: Context, _req: Request) -> Response {
    panic::panic_any(BoxError::from("error for sentry: from contextPanicHandler"))
}

/// Capture, timing, logging, close-on-disconnect, then the timeout guard.
pub fn chain(reporter: CrashReporter, timer: Arc<HttpTimer>, timeout: Duration) -> Chain {
    let mut chain = Chain::new();
    chain
        .use_middleware(CaptureMiddleware::new(reporter))
        .use_middleware(TimingMiddleware::new(timer))
        .use_middleware(LoggerMiddleware)
        .use_context(CloseMiddleware)
        .use_context(TimeoutMiddleware::new(timeout));
    chain
}

pub fn routes(chain: &Chain) -> Router {
    let mut router = Router::new();
    router
        .get("/normal", chain.handler(normal))
        .get("/panic", chain.handler(panicking))
        .get("/context/normal", chain.handler_ctx(context_normal))
        .get("/context/panic", chain.handler_ctx(context_panicking));
    router
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    use super::*;
    use crate::{Method, report::Report};

    struct Demo {
        router: Router,
        timer: Arc<HttpTimer>,
        reports: mpsc::Receiver<Report>,
    }

    fn demo() -> Demo {
        let (reporter, reports) = CrashReporter::channel(16);
        let timer = Arc::new(HttpTimer::new());
        let chain = chain(reporter, Arc::clone(&timer), Duration::from_secs(2));
        Demo {
            router: routes(&chain),
            timer,
            reports,
        }
    }

    async fn get(router: &Router, path: &str) -> Response {
        router
            .route(Context::background(), Request::new(Method::Get, path))
            .await
    }

    #[test]
    fn chain_has_every_layer() {
        let (reporter, _rx) = CrashReporter::channel(1);
        assert_eq!(chain(reporter, Arc::default(), Duration::from_secs(2)).len(), 5);
    }

    #[tokio::test]
    async fn normal_route() {
        let mut demo = demo();
        let res = get(&demo.router, "/normal").await;

        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.body_bytes(), b"normal");
        assert_eq!(demo.timer.count(), 1);
        assert!(demo.reports.try_recv().is_err());
    }

    #[tokio::test]
    async fn panic_route_reports_once() {
        let mut demo = demo();
        let res = get(&demo.router, "/panic").await;

        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert_eq!(res.body_bytes(), b"Internal Server Error");
        let report = demo.reports.try_recv().unwrap();
        assert_eq!(report.message, "error for sentry: from panicHandler");
        assert_eq!(report.request.url, "/panic");
        assert!(demo.reports.try_recv().is_err());
        // Timing sits inside capture, so the unwind skipped it.
        assert_eq!(demo.timer.count(), 0);
    }

    #[tokio::test]
    async fn context_routes() {
        let mut demo = demo();

        let res = get(&demo.router, "/context/normal").await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.body_bytes(), b"normal with context");

        let res = get(&demo.router, "/context/panic").await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert_eq!(
            demo.reports.try_recv().unwrap().message,
            "error for sentry: from contextPanicHandler"
        );
    }

    #[tokio::test]
    async fn unknown_route_is_404_without_running_the_chain() {
        let demo = demo();
        let res = get(&demo.router, "/nope").await;
        assert_eq!(res.status(), StatusCode::NotFound);
        assert_eq!(demo.timer.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_is_cut_off_by_the_timeout() {
        let (reporter, _reports) = CrashReporter::channel(4);
        let timer = Arc::new(HttpTimer::new());
        let chain = chain(reporter, Arc::clone(&timer), Duration::from_secs(2));
        let mut router = Router::new();
        router.get(
            "/slow",
            chain.handler(|_req: Request| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Response::new(StatusCode::Ok).body("slow")
            }),
        );

        let started = Instant::now();
        let res = get(&router, "/slow").await;

        assert_eq!(res.status(), StatusCode::ServiceUnavailable);
        assert!(started.elapsed() < Duration::from_secs(3));
        let sample = timer.snapshot();
        assert_eq!(sample.count, 1);
        assert!(sample.max >= Duration::from_secs(2));
    }
}
