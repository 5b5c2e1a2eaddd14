//! Tests for disposal, cancellation and lifecycle errors.

mod common;

use axum::Router;
use common::{TEST_TIMEOUT, started_server};
use lambda_test_server::{
    HostFuture, LambdaTestServer, OrphanReason, ResponseError, RunningHost, RuntimeHost,
    SHUTDOWN_REQUEST_ID, ServerError, ServerOptions, ServerPhase,
};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn unpublished() -> ServerOptions {
    ServerOptions::builder().publish_environment(false).build()
}

#[tokio::test]
async fn dispose_releases_long_poll_with_placeholder() {
    let server = started_server().await;
    let client = server.create_client().unwrap();

    let poll = tokio::spawn({
        let client = client.clone();
        async move { client.next_invocation().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.dispose();

    let next = tokio::time::timeout(TEST_TIMEOUT, poll)
        .await
        .expect("long poll was not released")
        .unwrap()
        .unwrap();
    assert!(next.is_shutdown_placeholder());
    assert_eq!(next.request_id, SHUTDOWN_REQUEST_ID);
    assert_eq!(&next.body[..], b"{}");
}

#[tokio::test]
async fn dispose_releases_waiting_callers() {
    let server = started_server().await;
    let client = server.create_client().unwrap();

    let dispatched = server.enqueue_payload("{}").unwrap();
    let queued = server.enqueue_payload("{}").unwrap();
    client.next_invocation().await.unwrap();

    server.dispose();

    assert_eq!(
        dispatched.response.recv_timeout(TEST_TIMEOUT).await,
        Err(ResponseError::Closed)
    );
    assert_eq!(
        queued.response.recv_timeout(TEST_TIMEOUT).await,
        Err(ResponseError::Closed)
    );
}

#[tokio::test]
async fn cancelling_start_token_releases_long_poll() {
    let cancel = CancellationToken::new();
    let server = LambdaTestServer::new(unpublished());
    server.start(&cancel).await.unwrap();
    let client = server.create_client().unwrap();

    let poll = tokio::spawn(async move { client.next_invocation().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    cancel.cancel();

    let next = tokio::time::timeout(TEST_TIMEOUT, poll)
        .await
        .expect("long poll was not released")
        .unwrap()
        .unwrap();
    assert!(next.is_shutdown_placeholder());
}

#[tokio::test]
async fn cancelling_start_token_releases_waiters_and_stops_enqueues() {
    let cancel = CancellationToken::new();
    let server = LambdaTestServer::new(unpublished());
    server.start(&cancel).await.unwrap();
    let client = server.create_client().unwrap();

    let dispatched = server.enqueue_payload("{}").unwrap();
    let queued = server.enqueue_payload("{}").unwrap();
    client.next_invocation().await.unwrap();

    cancel.cancel();

    assert_eq!(
        dispatched.response.recv_timeout(TEST_TIMEOUT).await,
        Err(ResponseError::Closed)
    );
    assert_eq!(
        queued.response.recv_timeout(TEST_TIMEOUT).await,
        Err(ResponseError::Closed)
    );
    assert!(matches!(
        server.enqueue_payload("{}"),
        Err(ServerError::Disposed)
    ));
    assert_eq!(server.in_flight_count(), 0);
}

#[tokio::test]
async fn drop_disposes_server() {
    let server = started_server().await;
    let context = server.enqueue_payload("{}").unwrap();

    drop(server);

    assert_eq!(
        context.response.recv_timeout(TEST_TIMEOUT).await,
        Err(ResponseError::Closed)
    );
}

#[tokio::test]
async fn lifecycle_state_errors() {
    let server = LambdaTestServer::new(unpublished());

    let err = server.enqueue_payload("{}").unwrap_err();
    assert!(err.is_state_error());
    assert!(matches!(err, ServerError::NotStarted));

    server.start(&CancellationToken::new()).await.unwrap();
    assert!(matches!(
        server.start(&CancellationToken::new()).await,
        Err(ServerError::AlreadyStarted)
    ));

    server.dispose();
    server.dispose();
    assert!(matches!(
        server.start(&CancellationToken::new()).await,
        Err(ServerError::Disposed)
    ));
    assert!(matches!(server.runtime_api_url(), Err(ServerError::Disposed)));
}

struct AddresslessHost {
    starts: Arc<AtomicUsize>,
}

impl RuntimeHost for AddresslessHost {
    fn serve(&self, _router: Router, _shutdown: CancellationToken) -> HostFuture<'_> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {
            let task = tokio::spawn(std::future::pending::<io::Result<()>>());
            Ok(RunningHost::new(vec!["127.0.0.1:0".parse().unwrap()], task))
        })
    }
}

#[tokio::test]
async fn host_without_usable_address_fails_to_start() {
    let starts = Arc::new(AtomicUsize::new(0));
    let server = LambdaTestServer::builder()
        .options(unpublished())
        .host(AddresslessHost {
            starts: Arc::clone(&starts),
        })
        .build();

    let err = server.start(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ServerError::AddressResolution(_)));
    assert_eq!(server.phase(), ServerPhase::Created);

    let err = server.start(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ServerError::AddressResolution(_)));
    assert_eq!(starts.load(Ordering::SeqCst), 2);
}

struct FailingHost;

impl RuntimeHost for FailingHost {
    fn serve(&self, _router: Router, _shutdown: CancellationToken) -> HostFuture<'_> {
        Box::pin(async {
            Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "address already in use",
            ))
        })
    }
}

#[tokio::test]
async fn host_bind_failure_is_reported() {
    let server = LambdaTestServer::builder()
        .options(unpublished())
        .host(FailingHost)
        .build();

    let err = server.start(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, ServerError::Bind(ref e) if e.kind() == io::ErrorKind::AddrInUse));
    assert_eq!(server.phase(), ServerPhase::Created);
}

#[tokio::test]
async fn orphan_reason_reflects_completion_history() {
    let server = started_server().await;
    let client = server.create_client().unwrap();

    let context = server.enqueue_payload("{}").unwrap();
    let next = client.next_invocation().await.unwrap();
    client.send_response(&next.request_id, "{}").await.unwrap();
    context.response.recv_timeout(TEST_TIMEOUT).await.unwrap();

    client.send_response(&next.request_id, "{}").await.unwrap();
    client.send_response("unknown", "{}").await.unwrap();

    let reasons: Vec<_> = server
        .orphaned_completions()
        .into_iter()
        .map(|orphan| orphan.reason)
        .collect();
    assert_eq!(
        reasons,
        vec![OrphanReason::AlreadyCompleted, OrphanReason::Unknown]
    );
}
