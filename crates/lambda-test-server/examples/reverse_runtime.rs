//! Starts a test server, runs a small runtime loop against it and prints
//! each correlated response.
//!
//! ```bash
//! RUST_LOG=lambda_test_server=debug cargo run -p lambda-test-server --example reverse_runtime
//! ```

use lambda_test_server::{LambdaTestServer, RuntimeApiClient, ServerError, ServerOptions};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Answers every invocation with its payload reversed until the server
/// hands out the shutdown placeholder.
async fn reverse_loop(client: RuntimeApiClient) -> Result<(), ServerError> {
    loop {
        let next = client.next_invocation().await?;
        if next.is_shutdown_placeholder() {
            return Ok(());
        }

        let reversed: String = String::from_utf8_lossy(&next.body).chars().rev().collect();
        client.send_response(&next.request_id, reversed).await?;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let server = LambdaTestServer::new(
        ServerOptions::builder()
            .function_name("reverse")
            .publish_environment(false)
            .build(),
    );
    let cancel = CancellationToken::new();
    server.start(&cancel).await?;
    println!("Runtime API listening on {}", server.runtime_api_url()?);

    let runtime = tokio::spawn(reverse_loop(server.create_client()?));

    for word in ["lambda", "runtime", "correlator"] {
        let context = server.enqueue_payload(word)?;
        let response = context.response.recv_timeout(Duration::from_secs(5)).await?;
        println!(
            "{} -> {} ({:?})",
            word,
            response.read_as_string(),
            response.duration
        );
    }

    server.dispose();
    runtime.await??;
    Ok(())
}
