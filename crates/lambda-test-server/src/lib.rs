//! # Lambda Test Server
//!
//! An in-process AWS Lambda Runtime API for exercising function code end to
//! end, without deploying anything.
//!
//! ## Overview
//!
//! A test enqueues an invocation, a Lambda runtime client (the real
//! `lambda_runtime` crate, or anything else speaking the Runtime API) polls
//! the server for work, and the test awaits the correlated response.
//!
//! ## Features
//!
//! - **Runtime API**: `next`, `response`, `error` and `init/error` under any
//!   API version prefix
//! - **Correlation**: each enqueue returns a handle that resolves exactly once
//!   with the function's response, its success flag and how long it took
//! - **Clean shutdown**: disposing releases every long poll and every waiting
//!   caller
//! - **Environment publication**: `AWS_LAMBDA_RUNTIME_API` and friends are set
//!   while the server runs and restored afterwards
//!
//! ## Quick Start
//!
//! ```no_run
//! use lambda_runtime::{Error as LambdaError, LambdaEvent, run, service_fn};
//! use lambda_test_server::{LambdaTestServer, ServerOptions};
//! use serde_json::Value;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn echo(event: LambdaEvent<Value>) -> Result<Value, LambdaError> {
//!     Ok(event.payload)
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = LambdaTestServer::new(ServerOptions::default());
//!     server.start(&CancellationToken::new()).await?;
//!
//!     let context = server.enqueue_json(&serde_json::json!({"name": "Lambda"}))?;
//!
//!     // AWS_LAMBDA_RUNTIME_API now points at the server.
//!     tokio::spawn(async move {
//!         let _ = run(service_fn(echo)).await;
//!     });
//!
//!     let response = context.response.recv().await?;
//!     assert!(response.is_successful);
//!     println!("{} in {:?}", response.read_as_string(), response.duration);
//!
//!     server.dispose();
//!     Ok(())
//! }
//! ```
//!
//! ## Driving the protocol by hand
//!
//! [`LambdaTestServer::create_client`] returns a [`RuntimeApiClient`] for
//! tests that want to play the runtime themselves:
//!
//! ```no_run
//! # use lambda_test_server::{LambdaTestServer, ServerOptions};
//! # use tokio_util::sync::CancellationToken;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = LambdaTestServer::new(ServerOptions::default());
//! server.start(&CancellationToken::new()).await?;
//! let context = server.enqueue_payload("ping")?;
//!
//! let client = server.create_client()?;
//! let next = client.next_invocation().await?;
//! client.send_response(&next.request_id, "pong").await?;
//!
//! assert_eq!(context.response.recv().await?.read_as_string(), "pong");
//! # Ok(())
//! # }
//! ```
//!
//! ## AWS Lambda Runtime API
//!
//! The server implements these endpoints:
//!
//! - `GET /{version}/runtime/invocation/next` - Get next invocation (long-poll)
//! - `POST /{version}/runtime/invocation/{requestId}/response` - Submit response
//! - `POST /{version}/runtime/invocation/{requestId}/error` - Report error
//! - `POST /{version}/runtime/init/error` - Report initialization error
//!
//! For more details on the Lambda Runtime API, see:
//! <https://docs.aws.amazon.com/lambda/latest/dg/runtimes-api.html>

pub mod client;
pub mod config;
pub mod correlator;
pub mod environment;
pub mod error;
pub mod host;
pub mod invocation;
pub mod runtime_api;
pub mod server;
pub(crate) mod slot;

pub use client::{ClientError, NextInvocation, RuntimeApiClient};
pub use config::{ServerOptions, ServerOptionsBuilder};
pub use correlator::{
    CompletionCallback, CompletionOutcome, Correlator, Dispatch, DispatchedInvocation,
    ORPHAN_CAPACITY, OrphanReason, OrphanedCompletion, SHUTDOWN_REQUEST_ID,
};
pub use environment::{
    EnvironmentOverride, LAMBDA_ENVIRONMENT_VARIABLES, clear_lambda_environment_variables,
    lambda_environment_variables,
};
pub use error::{BuilderError, ConfigError, ResponseError, ServerError, ServerResult};
pub use host::{HostFuture, RunningHost, RuntimeHost, TcpHost};
pub use invocation::{Invocation, InvocationBuilder, InvocationResponse, RuntimeHeaders};
pub use server::{LambdaTestServer, LambdaTestServerBuilder, ServerPhase};
pub use slot::{InvocationContext, PendingResponse};
