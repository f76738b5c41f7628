//! Minimal HTTP/1.1 responder served over accepted connections.
//!
//! Answers `OPTIONS` (including `OPTIONS *`) with the allowed methods, `GET`
//! and `HEAD` with an empty 200, and anything else with 405. It exists so a
//! connector can be exercised end to end; there is no routing.

use std::convert::Infallible;
use std::io;

use futures_util::future::BoxFuture;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, ALLOW, CONTENT_LENGTH, SERVER};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tracing::debug;

use crate::net::connection::Connection;
use crate::net::worker::ConnectionHandler;

const ALLOWED_METHODS: &str = "GET, HEAD, OPTIONS";
const SERVER_NAME: &str = concat!("listen-endpoint/", env!("CARGO_PKG_VERSION"));

/// HTTP/1.1 connection handler.
#[derive(Debug, Clone, Default)]
pub struct HttpHandler;

impl HttpHandler {
    pub fn new() -> Self {
        Self
    }
}

impl ConnectionHandler for HttpHandler {
    fn protocol(&self) -> &'static str {
        "HTTP/1.1"
    }

    fn handle(&self, connection: Connection) -> BoxFuture<'static, io::Result<()>> {
        Box::pin(async move {
            let (stream, _peer) = connection.into_parts();
            http1::Builder::new()
                .serve_connection(
                    TokioIo::new(stream),
                    service_fn(|request: Request<Incoming>| async move {
                        Ok::<_, Infallible>(respond(&request))
                    }),
                )
                .await
                .map_err(io::Error::other)
        })
    }
}

/// Build the response for `request`.
pub fn respond<B>(request: &Request<B>) -> Response<String> {
    debug!(method = %request.method(), uri = %request.uri(), "request");
    let status = match *request.method() {
        Method::OPTIONS | Method::GET | Method::HEAD => StatusCode::OK,
        _ => StatusCode::METHOD_NOT_ALLOWED,
    };

    let mut response = Response::new(String::new());
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));
    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
    if status != StatusCode::OK || *request.method() == Method::OPTIONS {
        headers.insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, uri: &str) -> Request<()> {
        Request::builder().method(method).uri(uri).body(()).unwrap()
    }

    #[test]
    fn options_asterisk_lists_allowed_methods() {
        let response = respond(&request(Method::OPTIONS, "*"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ALLOW], ALLOWED_METHODS);
    }

    #[test]
    fn get_and_head_succeed_without_allow() {
        for method in [Method::GET, Method::HEAD] {
            let response = respond(&request(method, "/"));
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(ALLOW).is_none());
        }
    }

    #[test]
    fn other_methods_are_not_allowed() {
        let response = respond(&request(Method::POST, "/"));
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], ALLOWED_METHODS);
    }
}
