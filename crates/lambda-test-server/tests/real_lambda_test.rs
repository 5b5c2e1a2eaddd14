//! Drives the published Runtime API with the real `lambda_runtime` crate.
//!
//! The runtime reads its configuration from the process environment, so
//! these tests publish it and run serially.

mod common;

use common::{TEST_TIMEOUT, started_server_with};
use lambda_runtime::{Error as LambdaError, LambdaEvent, run, service_fn};
use lambda_test_server::ServerOptions;
use serde::{Deserialize, Serialize};
use serde_json::json;
use serial_test::serial;

#[derive(Deserialize)]
struct SumRequest {
    values: Vec<i64>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct SumResponse {
    sum: i64,
    function_name: String,
}

async fn sum_handler(event: LambdaEvent<SumRequest>) -> Result<SumResponse, LambdaError> {
    let (request, context) = event.into_parts();
    Ok(SumResponse {
        sum: request.values.iter().sum(),
        function_name: context.env_config.function_name.clone(),
    })
}

async fn failing_handler(event: LambdaEvent<SumRequest>) -> Result<SumResponse, LambdaError> {
    if event.payload.values.is_empty() {
        return Err("values were empty".into());
    }
    sum_handler(event).await
}

#[tokio::test]
#[serial]
async fn real_runtime_answers_enqueued_invocations() {
    let server = started_server_with(ServerOptions::builder().function_name("summer").build()).await;

    let first = server.enqueue_json(&json!({"values": [1, 2, 3]})).unwrap();
    let second = server.enqueue_json(&json!({"values": [10, 20]})).unwrap();

    let runtime = tokio::spawn(async { run(service_fn(sum_handler)).await });

    let response = first.response.recv_timeout(TEST_TIMEOUT).await.unwrap();
    assert!(response.is_successful);
    assert_eq!(
        response.read_as::<SumResponse>().unwrap(),
        SumResponse {
            sum: 6,
            function_name: "summer".to_string(),
        }
    );

    let response = second.response.recv_timeout(TEST_TIMEOUT).await.unwrap();
    assert_eq!(response.read_as::<SumResponse>().unwrap().sum, 30);

    assert!(server.orphaned_completions().is_empty());

    runtime.abort();
    server.dispose();
}

#[tokio::test]
#[serial]
async fn real_runtime_handler_error_is_reported() {
    let server = started_server_with(ServerOptions::default()).await;

    let failed = server.enqueue_json(&json!({"values": []})).unwrap();
    let succeeded = server.enqueue_json(&json!({"values": [4]})).unwrap();

    let runtime = tokio::spawn(async { run(service_fn(failing_handler)).await });

    let response = failed.response.recv_timeout(TEST_TIMEOUT).await.unwrap();
    assert!(!response.is_successful);
    let error: serde_json::Value = response.read_as().unwrap();
    assert!(error.get("errorType").is_some());
    assert_eq!(error["errorMessage"], "values were empty");

    let response = succeeded.response.recv_timeout(TEST_TIMEOUT).await.unwrap();
    assert!(response.is_successful);
    assert_eq!(response.read_as::<SumResponse>().unwrap().sum, 4);

    runtime.abort();
    server.dispose();
}
