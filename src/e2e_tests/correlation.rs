//! Message-ID assignment, correlation under concurrency, timeouts, and
//! in-flight teardown

use super::mock_server::{Behavior, MockServer};
use crate::client::{Client, ClientConfig, Security};
use crate::codec::Fields;
use crate::error::{Error, Result};
use crate::protocol::constants::Command;
use crate::protocol::{Request, Response};
use std::time::Duration;

async fn connect(server: &MockServer, config: ClientConfig) -> Client {
    let config = ClientConfig {
        port: server.port(),
        ..config
    };
    Client::connect(&server.host(), config).await.unwrap()
}

async fn send_echo(client: &Client) -> Result<Response> {
    client
        .shared
        .send(Request::new(Command::Echo, Fields::new()), Security::None)
        .await
}

#[tokio::test]
async fn test_message_ids_monotonic_from_zero() {
    let server = MockServer::start(Behavior::default()).await;
    let client = connect(&server, ClientConfig::default()).await;

    for expected in 0..3u64 {
        let response = send_echo(&client).await.unwrap();
        assert_eq!(response.header.message_id, expected);
    }
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_requests_survive_reordered_responses() {
    // The server holds all three echoes, then answers newest-first.
    let server = MockServer::start(Behavior {
        reverse_batch: Some(3),
        ..Behavior::default()
    })
    .await;
    let client = connect(&server, ClientConfig::default()).await;

    let (a, b, c) = tokio::join!(send_echo(&client), send_echo(&client), send_echo(&client));
    let mut ids = vec![
        a.unwrap().header.message_id,
        b.unwrap().header.message_id,
        c.unwrap().header.message_id,
    ];
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2]);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_request_timeout_and_dropped_late_response() {
    let server = MockServer::start(Behavior {
        echo_delay: Some(Duration::from_millis(400)),
        ..Behavior::default()
    })
    .await;
    let client = connect(
        &server,
        ClientConfig {
            request_timeout: Duration::from_millis(100),
            ..ClientConfig::default()
        },
    )
    .await;

    let err = send_echo(&client).await.unwrap_err();
    assert!(matches!(err, Error::RequestTimeout));

    // The late response for message 0 must not reach the next waiter.
    let err = send_echo(&client).await.unwrap_err();
    assert!(matches!(err, Error::RequestTimeout));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(client.is_connected().await);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_close_rejects_inflight_waiters() {
    let server = MockServer::start(Behavior {
        echo_delay: Some(Duration::from_secs(30)),
        ..Behavior::default()
    })
    .await;
    let client = connect(
        &server,
        ClientConfig {
            request_timeout: Duration::from_secs(10),
            ..ClientConfig::default()
        },
    )
    .await;

    let inflight = {
        let client = client.clone();
        tokio::spawn(async move { send_echo(&client).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close().await.unwrap();

    let outcome = inflight.await.unwrap();
    assert!(matches!(outcome, Err(Error::ConnectionAborted)));
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn test_server_disconnect_fails_pending_and_emits_error() {
    let server = MockServer::start(Behavior {
        echo_delay: Some(Duration::from_secs(30)),
        ..Behavior::default()
    })
    .await;
    let client = connect(
        &server,
        ClientConfig {
            request_timeout: Duration::from_secs(10),
            ..ClientConfig::default()
        },
    )
    .await;
    let mut events = client.events();

    let inflight = {
        let client = client.clone();
        tokio::spawn(async move { send_echo(&client).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(server);

    let outcome = inflight.await.unwrap();
    assert!(matches!(outcome, Err(Error::ConnectionClosed)));
    assert!(matches!(
        events.recv().await,
        Ok(crate::client::ClientEvent::Error(_))
    ));
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn test_send_after_close_is_invalid_state() {
    let server = MockServer::start(Behavior::default()).await;
    let client = connect(&server, ClientConfig::default()).await;
    client.close().await.unwrap();

    let err = send_echo(&client).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}
