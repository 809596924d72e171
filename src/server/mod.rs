//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a [`Router`].
//! Connections are persistent unless the client asks otherwise.
//!
//! While a request is being handled the connection is still read from, so a
//! client hanging up mid-request is noticed. That fires the request's
//! [`CloseSignal`], which [`CloseMiddleware`](crate::middleware::CloseMiddleware)
//! turns into a cancelled context.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use futures::future;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    context::Context,
    http::{
        StatusCode,
        request::{Request, RequestError},
        response::Response,
    },
    router::Router,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Fires once when the peer closes the connection a request arrived on.
#[derive(Debug, Clone)]
pub struct CloseSignal {
    rx: watch::Receiver<bool>,
}

impl CloseSignal {
    pub fn is_closed(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the peer has closed. Pending forever if the connection
    /// finishes the request without that happening.
    pub async fn closed(&mut self) {
        let fired = self.rx.wait_for(|closed| *closed).await.is_ok();
        if !fired {
            future::pending::<()>().await;
        }
    }
}

/// Server-side half of a [`CloseSignal`].
#[derive(Debug)]
pub(crate) struct CloseNotifier {
    tx: watch::Sender<bool>,
}

impl CloseNotifier {
    pub(crate) fn close(&self) {
        self.tx.send_replace(true);
    }
}

pub(crate) fn close_channel() -> (CloseNotifier, CloseSignal) {
    let (tx, rx) = watch::channel(false);
    (CloseNotifier { tx }, CloseSignal { rx })
}

/// The ravel HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use ravel::{Request, Response, Router, Server, StatusCode};
/// use ravel::middleware::{Chain, LoggerMiddleware};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut chain = Chain::new();
///     chain.use_middleware(LoggerMiddleware);
///
///     let mut router = Router::new();
///     router.get("/normal", chain.handler(|_req: Request| async {
///         Response::new(StatusCode::Ok).body("normal")
///     }));
///
///     Server::bind("127.0.0.1:8080").await?.run(router).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections forever, one task per connection. Failed accepts
    /// are logged and retried.
    pub async fn run(self, router: Router) -> Result<(), ServerError> {
        let router = Arc::new(router);
        info!(address = %self.local_addr, routes = router.len(), "ravel listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let router = Arc::clone(&router);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, router).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

async fn reject(stream: &mut TcpStream, response: Response) -> Result<(), std::io::Error> {
    stream.write_all(&response.keep_alive(false).into_bytes()).await?;
    stream.flush().await
}

/// Serves one connection until the peer leaves, asks to close, or sends
/// something unparseable.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<Router>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let (mut request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                if buf.len() > MAX_REQUEST_SIZE {
                    warn!(peer = %peer_addr, "request head too large, sending 413");
                    reject(&mut stream, Response::error(StatusCode::PayloadTooLarge)).await?;
                    break;
                }
                if stream.read_buf(&mut buf).await? == 0 {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    break;
                }
                continue;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                reject(&mut stream, Response::error(StatusCode::BadRequest)).await?;
                break;
            }
        };

        let content_length = request.content_length().unwrap_or(0);
        let total = body_offset + content_length;
        if total > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, total, "request too large, sending 413");
            reject(&mut stream, Response::error(StatusCode::PayloadTooLarge)).await?;
            break;
        }
        if buf.len() < total {
            if stream.read_buf(&mut buf).await? == 0 {
                debug!(peer = %peer_addr, "connection closed mid-body");
                break;
            }
            continue;
        }

        request.truncate_body(content_length);
        let _ = buf.split_to(total);
        let keep_alive = request.is_keep_alive();

        let (notifier, signal) = close_channel();
        request.set_close_signal(signal);

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let mut peer_closed = false;
        let response = {
            let dispatch = router.route(Context::background(), request);
            tokio::pin!(dispatch);
            loop {
                tokio::select! {
                    response = &mut dispatch => break response,
                    read = stream.read_buf(&mut buf), if !peer_closed && buf.len() < MAX_REQUEST_SIZE => {
                        if matches!(read, Ok(0) | Err(_)) {
                            debug!(peer = %peer_addr, "peer closed during dispatch");
                            peer_closed = true;
                            notifier.close();
                        }
                    }
                }
            }
        };

        // A half-closed peer can still read: write what we have, then stop.
        if peer_closed {
            let bytes = response.keep_alive(false).into_bytes();
            if let Err(e) = stream.write_all(&bytes).await {
                debug!(peer = %peer_addr, error = %e, "peer gone before response");
            } else {
                let _ = stream.flush().await;
            }
            break;
        }

        let keep_alive = keep_alive && response.is_keep_alive();
        stream
            .write_all(&response.keep_alive(keep_alive).into_bytes())
            .await?;
        stream.flush().await?;

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}
