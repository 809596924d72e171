//! HTTP/1.1 request parsing using the [`httparse`] crate.

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};
use crate::server::CloseSignal;

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// A parsed HTTP/1.1 request.
///
/// Created by the server with [`Request::parse`], or directly with
/// [`Request::new`] when driving a handler without a socket.
///
/// # Examples
///
/// ```
/// use ravel::http::Request;
///
/// let raw = b"GET /normal?verbose=1 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/normal");
/// assert_eq!(request.url(), "/normal?verbose=1");
/// assert_eq!(request.query_string(), Some("verbose=1"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
    path_params: HashMap<String, String>,
    close_signal: Option<CloseSignal>,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Builds an HTTP/1.1 request for `target` with no headers and an empty
    /// body.
    ///
    /// # Arguments
    ///
    /// - `method` — The request method.
    /// - `target` — Path plus optional `?query`, e.g. `"/normal?verbose=1"`.
    ///
    /// # Examples
    ///
    /// ```
    /// use ravel::http::{Method, Request};
    ///
    /// let request = Request::new(Method::Get, "/context/normal").header("X-Trace", "1");
    /// assert_eq!(request.path(), "/context/normal");
    /// assert_eq!(request.headers().get("x-trace"), Some("1"));
    /// assert!(request.close_signal().is_none());
    /// ```
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = split_target(target);
        Self {
            method,
            path,
            query,
            version: 1,
            headers: Headers::new(),
            body: Bytes::new(),
            path_params: HashMap::new(),
            close_signal: None,
        }
    }

    /// Appends a header. Builder-style companion to [`Request::new`].
    ///
    /// # Arguments
    ///
    /// - `name` — Header name; lookups ignore its case.
    /// - `value` — Header value, stored as given.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Parse a request head from `buf`.
    ///
    /// Returns the request and the offset of the first body byte. The body is
    /// whatever follows the head in `buf`; the server only calls this once
    /// `Content-Length` bytes are buffered.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] — the head is not fully buffered yet.
    /// - [`RequestError::Parse`] — the data is not HTTP/1.x.
    /// - [`RequestError::MissingField`] — method, path or version absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Request::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw.method {
            Some(m) => m.parse().unwrap_or_else(|never| match never {}),
            None => return Err(RequestError::MissingField { field: "method" }),
        };
        let target = raw.path.ok_or(RequestError::MissingField { field: "path" })?;
        let version = raw
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let mut request = Self::new(method, target);
        request.version = version;
        request.headers = header_map;
        request.body = Bytes::copy_from_slice(&buf[body_offset..]);
        Ok((request, body_offset))
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Request target as sent: path plus `?query` when present.
    ///
    /// This is what the logger prints and what crash reports record as the
    /// request URL.
    ///
    /// # Returns
    ///
    /// An owned string, e.g. `"/search?q=rust"`, or just the path when the
    /// request had no query.
    pub fn url(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// HTTP minor version: `0` for HTTP/1.0, `1` for HTTP/1.1.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns all request headers in arrival order.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Raw query string without the leading `?`, if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Named capture from the matched route, e.g. `id` for `/users/:id`.
    ///
    /// # Arguments
    ///
    /// - `key` — The parameter name without its leading `:`.
    ///
    /// # Returns
    ///
    /// `Some(value)` once the [`Router`](crate::Router) has matched a
    /// parameterised pattern, `None` otherwise.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.path_params.get(key).map(String::as_str)
    }

    /// Request body, exactly `Content-Length` bytes once served.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// HTTP/1.1 defaults to keep-alive; HTTP/1.0 needs `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Parsed `Content-Length`, or `None` when absent or not a number.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }

    /// Signal that fires when the peer closes the connection this request
    /// arrived on. `None` for requests not read from a socket.
    pub fn close_signal(&self) -> Option<CloseSignal> {
        self.close_signal.clone()
    }

    pub(crate) fn set_path_params(&mut self, params: HashMap<String, String>) {
        self.path_params = params;
    }

    pub(crate) fn set_close_signal(&mut self, signal: CloseSignal) {
        self.close_signal = Some(signal);
    }

    /// Drops anything past `len` body bytes, e.g. a pipelined next request.
    pub(crate) fn truncate_body(&mut self, len: usize) {
        self.body.truncate(len);
    }
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET /context/normal HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/context/normal");
        assert_eq!(req.url(), "/context/normal");
        assert_eq!(req.version(), 1);
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn url_keeps_query() {
        let raw = b"GET /search?q=rust+lang&page=2 HTTP/1.1\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.url(), "/search?q=rust+lang&page=2");
        assert_eq!(req.query_string(), Some("q=rust+lang&page=2"));

        let (bare, _) = Request::parse(b"GET /search HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(bare.url(), "/search");
        assert_eq!(bare.query_string(), None);
    }

    #[test]
    fn incomplete_head() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let raw = b"\x01\x02 nope\r\n\r\n";
        assert!(matches!(Request::parse(raw), Err(RequestError::Parse(_))));
    }

    #[test]
    fn keep_alive_rules() {
        let (v11, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(v11.is_keep_alive());

        let (close, _) = Request::parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!close.is_keep_alive());

        let (v10, _) = Request::parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!v10.is_keep_alive());
    }

    #[test]
    fn body_after_head() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET / HTTP/1.1\r\n\r\n";
        let (mut req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(&raw[offset..], req.body().as_ref());

        req.truncate_body(5);
        assert_eq!(req.body().as_ref(), b"hello");
    }

    #[test]
    fn built_requests_have_no_close_signal() {
        let req = Request::new(Method::Get, "/normal").header("X-Trace", "1");
        assert!(req.close_signal().is_none());
        assert_eq!(req.headers().get("x-trace"), Some("1"));
    }
}
