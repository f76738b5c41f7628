//! Unix domain socket endpoints.

#![cfg(unix)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use common::*;
use listen_endpoint::config::{ConnectorConfig, NativeConfig};
use listen_endpoint::net::{BackendKind, BindAddress, EndpointError, LocalAddr};
use listen_endpoint::{Connector, LifecycleState};
use tokio::net::UnixStream;

fn unix_connector(path: PathBuf, bind_on_init: bool) -> ConnectorConfig {
    ConnectorConfig {
        name: "uds".to_string(),
        unix_domain_socket_path: Some(path),
        bind_on_init,
        ..ConnectorConfig::default()
    }
}

const UNIX_BACKENDS: [BackendKind; 2] = [BackendKind::Blocking, BackendKind::Multiplexed];

#[tokio::test]
async fn options_request_over_unix_socket() {
    for kind in UNIX_BACKENDS {
        let path = unique_socket_path("options");
        let mut connector =
            Connector::from_config(&unix_connector(path.clone(), true), kind, &NativeConfig::default())
                .unwrap();
        connector.init().await.unwrap();
        connector.start().await.unwrap();
        assert_eq!(connector.local_addr(), Some(LocalAddr::Unix(path.clone())));

        let stream = UnixStream::connect(&path).await.unwrap();
        let response = raw_request(stream, "OPTIONS * HTTP/1.0\r\n\r\n").await;
        assert_ok(&response);
        assert!(
            response.to_ascii_lowercase().contains("allow: get, head, options"),
            "{kind}: missing Allow header in {response:?}"
        );

        connector.destroy().await.unwrap();
        assert!(!path.exists(), "{kind}: socket file left behind");
    }
}

#[tokio::test]
async fn path_can_be_bound_again_after_stop() {
    for kind in UNIX_BACKENDS {
        let path = unique_socket_path("rebind");
        let mut endpoint = http_endpoint(kind, BindAddress::unix(&path), false);

        for _ in 0..2 {
            endpoint.start().await.unwrap();
            assert!(path.exists());
            let stream = UnixStream::connect(&path).await.unwrap();
            assert_ok(&raw_request(stream, "GET / HTTP/1.0\r\n\r\n").await);

            endpoint.stop().await.unwrap();
            assert_eq!(endpoint.state(), LifecycleState::Stopped);
            assert!(!path.exists(), "{kind}: socket file not removed on stop");
        }
        endpoint.destroy().await.unwrap();
    }
}

#[tokio::test]
async fn existing_file_is_a_bind_error() {
    for kind in UNIX_BACKENDS {
        let path = unique_socket_path("taken");
        std::fs::write(&path, b"").unwrap();

        let mut endpoint = http_endpoint(kind, BindAddress::unix(&path), true);
        let err = endpoint.init().await.unwrap_err();
        assert!(matches!(err, EndpointError::Bind { .. }), "{kind}: {err}");
        assert_eq!(endpoint.state(), LifecycleState::New);
        assert!(path.exists(), "{kind}: someone else's file must not be removed");

        std::fs::remove_file(&path).unwrap();
    }
}

#[tokio::test]
async fn permissions_are_applied_to_socket_file() {
    let path = unique_socket_path("mode");
    let config = ConnectorConfig {
        unix_domain_socket_permissions: Some("0600".to_string()),
        ..unix_connector(path.clone(), true)
    };
    let mut connector =
        Connector::from_config(&config, BackendKind::Multiplexed, &NativeConfig::default()).unwrap();
    connector.init().await.unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    connector.destroy().await.unwrap();
}

#[tokio::test]
async fn native_backend_rejects_unix_sockets() {
    let path = unique_socket_path("native");
    let result = Connector::from_config(
        &unix_connector(path.clone(), true),
        BackendKind::Native,
        &NativeConfig::default(),
    );
    assert!(matches!(
        result,
        Err(EndpointError::Unsupported { backend: BackendKind::Native, .. })
    ));
    assert!(!path.exists());
}
