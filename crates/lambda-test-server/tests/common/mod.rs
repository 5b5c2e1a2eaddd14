//! Shared test utilities for lambda-test-server integration tests.

use lambda_test_server::{LambdaTestServer, ServerOptions};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Upper bound for any single wait in these tests.
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Installs a fmt subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Starts a server that leaves the process environment alone, so tests in
/// the same binary can run in parallel.
#[allow(dead_code)]
pub async fn started_server() -> LambdaTestServer {
    started_server_with(ServerOptions::builder().publish_environment(false).build()).await
}

/// Starts a server with the given options.
pub async fn started_server_with(options: ServerOptions) -> LambdaTestServer {
    init_tracing();
    let server = LambdaTestServer::new(options);
    server
        .start(&CancellationToken::new())
        .await
        .expect("Failed to start test server");
    server
}
