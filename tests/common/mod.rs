//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use listen_endpoint::config::{ConnectorConfig, NativeConfig};
use listen_endpoint::http::HttpHandler;
use listen_endpoint::net::{
    AnyEndpoint, BackendKind, BindAddress, Dispatcher, EndpointSettings, LocalAddr,
};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

static SOCKET_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Build an HTTP endpoint for `kind` on `address`.
pub fn http_endpoint(kind: BackendKind, address: BindAddress, bind_on_init: bool) -> AnyEndpoint {
    http_endpoint_with(kind, EndpointSettings::new("test", address).bind_on_init(bind_on_init))
}

pub fn http_endpoint_with(kind: BackendKind, settings: EndpointSettings) -> AnyEndpoint {
    let dispatcher = Dispatcher::new("test", Arc::new(HttpHandler::new()), 64);
    AnyEndpoint::build(kind, settings, &NativeConfig::default(), dispatcher)
        .expect("endpoint should build")
}

/// Connector config bound to an ephemeral loopback port.
pub fn loopback_connector(name: &str, bind_on_init: bool) -> ConnectorConfig {
    ConnectorConfig {
        name: name.to_string(),
        address: Some("127.0.0.1".to_string()),
        port: Some(0),
        bind_on_init,
        ..ConnectorConfig::default()
    }
}

/// A loopback port that was free a moment ago.
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("ephemeral port")
}

/// Try to bind `port` the way an unrelated process would.
pub fn external_bind(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(("127.0.0.1", port))
}

pub fn inet_addr(local: &LocalAddr) -> SocketAddr {
    match local {
        LocalAddr::Inet(addr) => *addr,
        LocalAddr::Unix(path) => panic!("expected inet address, got {}", path.display()),
    }
}

/// A socket path in the temp dir that no other test uses.
pub fn unique_socket_path(tag: &str) -> PathBuf {
    let n = SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("le-{}-{}-{}.sock", tag, std::process::id(), n))
}

/// Send a raw HTTP/1.0 request and read until the server closes.
pub async fn raw_request<S>(mut stream: S, request: &str) -> String
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::time::timeout(IO_TIMEOUT, async {
        stream.write_all(request.as_bytes()).await?;
        stream.flush().await?;
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;
        Ok::<_, std::io::Error>(String::from_utf8_lossy(&response).into_owned())
    })
    .await
    .expect("response within timeout")
    .expect("request succeeds")
}

pub async fn http_get(addr: SocketAddr) -> String {
    let stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    raw_request(stream, "GET / HTTP/1.0\r\n\r\n").await
}

/// hyper answers an HTTP/1.0 request with its own version in the status line.
pub fn assert_ok(response: &str) {
    assert!(response.starts_with("HTTP/1."), "unexpected response: {response:?}");
    let status_line = response.lines().next().unwrap_or_default();
    assert!(status_line.contains(" 200 "), "unexpected status: {status_line:?}");
}
