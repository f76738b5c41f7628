//! Config-driven server startup and shutdown.

mod common;

use common::*;
use listen_endpoint::config::parse_config;
use listen_endpoint::net::EndpointError;
use listen_endpoint::{LifecycleState, Server, StartupError};

#[tokio::test]
async fn starts_and_stops_every_connector() {
    let config = parse_config(
        r#"
        backend = "blocking"

        [[connectors]]
        name = "early"
        address = "127.0.0.1"
        port = 0

        [[connectors]]
        name = "late"
        address = "127.0.0.1"
        port = 0
        bind_on_init = false
        acceptor_count = 2
        "#,
    )
    .unwrap();

    let mut server = Server::from_config(&config).unwrap();
    server.init().await.unwrap();
    assert!(server.connector("early").unwrap().is_bound());
    assert!(!server.connector("late").unwrap().is_bound());

    server.start().await.unwrap();
    for connector in server.connectors() {
        assert_eq!(connector.state(), LifecycleState::Running);
        let addr = inet_addr(&connector.local_addr().unwrap());
        assert_ok(&http_get(addr).await);
    }

    server.stop().await;
    assert_eq!(server.connector("early").unwrap().state(), LifecycleState::Paused);
    assert_eq!(server.connector("late").unwrap().state(), LifecycleState::Stopped);

    server.destroy().await;
    for connector in server.connectors() {
        assert_eq!(connector.state(), LifecycleState::Destroyed);
        assert!(!connector.is_bound());
    }
}

#[tokio::test]
async fn failed_init_rolls_back_started_connectors() {
    let occupied = external_bind(0).unwrap();
    let port = occupied.local_addr().unwrap().port();
    let config = parse_config(&format!(
        r#"
        [[connectors]]
        name = "first"
        address = "127.0.0.1"
        port = 0

        [[connectors]]
        name = "second"
        address = "127.0.0.1"
        port = {port}
        "#
    ))
    .unwrap();

    let mut server = Server::from_config(&config).unwrap();
    let err = server.init().await.unwrap_err();
    match err {
        StartupError::Connector { connector, source } => {
            assert_eq!(connector, "second");
            assert!(source.is_address_in_use());
        }
        other => panic!("unexpected error: {other}"),
    }

    let first = server.connector("first").unwrap();
    assert_eq!(first.state(), LifecycleState::Destroyed);
    assert!(!first.is_bound());
}

#[tokio::test]
async fn unsupported_backend_fails_before_binding() {
    let config = parse_config(
        r#"
        [[connectors]]
        name = "tcp"
        address = "127.0.0.1"
        port = 0
        "#,
    )
    .unwrap();
    let mut config = config;
    config.backend = listen_endpoint::BackendKind::Native;
    config.connectors[0].unix_domain_socket_path = Some(unique_socket_path("server"));
    config.connectors[0].address = None;
    config.connectors[0].port = None;

    match Server::from_config(&config) {
        Err(StartupError::Connector {
            source: EndpointError::Unsupported { .. },
            ..
        }) => {}
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("native backend accepted a unix socket"),
    }
}
