//! # ravel
//!
//! An async HTTP/1.1 service built around an ordered middleware chain.
//!
//! A [`Chain`] wraps each terminal handler in middleware, first registered
//! outermost. The built-in layers turn panics into `500` responses plus a
//! crash report, time every request, log it, cancel the request [`Context`]
//! when the client disconnects, and answer `503` when downstream overruns
//! its deadline.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use ravel::{Chain, Request, Response, Router, Server, StatusCode};
//! use ravel::middleware::{LoggerMiddleware, TimeoutMiddleware};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut chain = Chain::new();
//!     chain
//!         .use_middleware(LoggerMiddleware)
//!         .use_context(TimeoutMiddleware::new(Duration::from_secs(2)));
//!
//!     let mut router = Router::new();
//!     router.get("/normal", chain.handler(|_req: Request| async {
//!         Response::new(StatusCode::Ok).body("normal")
//!     }));
//!
//!     Server::bind("127.0.0.1:8080").await?.run(router).await?;
//!     Ok(())
//! }
//! ```

pub mod apm;
pub mod config;
pub mod context;
pub mod demo;
pub mod handler;
pub mod http;
pub mod middleware;
pub mod report;
pub mod router;
pub mod server;

pub use context::Context;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use middleware::Chain;
pub use router::Router;
pub use server::{Server, ServerError};
