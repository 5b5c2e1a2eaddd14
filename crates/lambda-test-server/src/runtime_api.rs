//! Lambda Runtime API HTTP endpoints.
//!
//! Implements the runtime-facing half of the Lambda Runtime API as documented at:
//! <https://docs.aws.amazon.com/lambda/latest/dg/runtimes-api.html>
//!
//! The API version segment is not checked, so runtimes built against any
//! `/{version}/runtime/...` prefix are served.

use crate::correlator::{CompletionOutcome, Correlator};
use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Request ID of the invocation being delivered.
pub const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";
/// ARN of the function being invoked.
pub const FUNCTION_ARN_HEADER: &str = "Lambda-Runtime-Invoked-Function-Arn";
/// X-Ray trace header for the invocation.
pub const TRACE_ID_HEADER: &str = "Lambda-Runtime-Trace-Id";
/// Deadline in milliseconds since the Unix epoch.
pub const DEADLINE_HEADER: &str = "Lambda-Runtime-Deadline-Ms";
/// Client context from the AWS Mobile SDK.
pub const CLIENT_CONTEXT_HEADER: &str = "Lambda-Runtime-Client-Context";
/// Cognito identity from the AWS Mobile SDK.
pub const COGNITO_IDENTITY_HEADER: &str = "Lambda-Runtime-Cognito-Identity";

/// Synchronous invocation payload limit enforced by Lambda.
const MAX_PAYLOAD_BYTES: usize = 6 * 1024 * 1024;

/// Shared state for Runtime API endpoints.
#[derive(Clone)]
pub(crate) struct RuntimeApiState {
    pub correlator: Arc<Correlator>,
    pub shutdown: CancellationToken,
}

/// Creates the Runtime API router.
pub(crate) fn create_runtime_api_router(state: RuntimeApiState) -> Router {
    Router::new()
        .route("/{version}/runtime/invocation/next", get(next_invocation))
        .route(
            "/{version}/runtime/invocation/{request_id}/response",
            post(invocation_response),
        )
        .route(
            "/{version}/runtime/invocation/{request_id}/error",
            post(invocation_error),
        )
        .route("/{version}/runtime/init/error", post(init_error))
        .fallback(unhandled)
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES))
        .with_state(state)
}

/// Helper function to safely insert a header value.
#[allow(clippy::result_large_err)]
fn safe_header_insert(
    headers: &mut HeaderMap,
    name: &'static str,
    value: impl AsRef<str>,
) -> Result<(), Response> {
    match HeaderValue::from_str(value.as_ref()) {
        Ok(header_value) => {
            headers.insert(name, header_value);
            Ok(())
        }
        Err(_) => {
            tracing::error!(header = name, "Header value is not valid for HTTP");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create header {}", name),
            )
                .into_response())
        }
    }
}

/// GET /{version}/runtime/invocation/next
///
/// Long-polls for the next invocation. Once the server shuts down this
/// answers with the shutdown placeholder instead of blocking.
async fn next_invocation(State(state): State<RuntimeApiState>) -> Response {
    let dispatch = state.correlator.next(&state.shutdown).await;
    let invocation = dispatch.into_invocation();
    let runtime_headers = &invocation.headers;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    if let Err(e) = safe_header_insert(&mut headers, REQUEST_ID_HEADER, &runtime_headers.request_id) {
        return e;
    }

    if let Err(e) = safe_header_insert(
        &mut headers,
        DEADLINE_HEADER,
        runtime_headers.deadline_ms().to_string(),
    ) {
        return e;
    }

    if let Err(e) = safe_header_insert(
        &mut headers,
        FUNCTION_ARN_HEADER,
        &runtime_headers.invoked_function_arn,
    ) {
        return e;
    }

    if let Err(e) = safe_header_insert(&mut headers, TRACE_ID_HEADER, &runtime_headers.trace_id) {
        return e;
    }

    if let Some(client_context) = &runtime_headers.client_context
        && let Err(e) = safe_header_insert(&mut headers, CLIENT_CONTEXT_HEADER, client_context)
    {
        return e;
    }

    if let Some(cognito_identity) = &runtime_headers.cognito_identity
        && let Err(e) = safe_header_insert(&mut headers, COGNITO_IDENTITY_HEADER, cognito_identity)
    {
        return e;
    }

    (StatusCode::OK, headers, invocation.payload).into_response()
}

/// POST /{version}/runtime/invocation/{request_id}/response
///
/// Always 204, including for IDs with no waiting caller.
async fn invocation_response(
    State(state): State<RuntimeApiState>,
    Path((_version, request_id)): Path<(String, String)>,
    body: Bytes,
) -> StatusCode {
    complete(&state, &request_id, body, true)
}

/// POST /{version}/runtime/invocation/{request_id}/error
///
/// The body is the runtime's error document, passed to the caller verbatim.
async fn invocation_error(
    State(state): State<RuntimeApiState>,
    Path((_version, request_id)): Path<(String, String)>,
    body: Bytes,
) -> StatusCode {
    complete(&state, &request_id, body, false)
}

fn complete(state: &RuntimeApiState, request_id: &str, body: Bytes, is_successful: bool) -> StatusCode {
    match state.correlator.complete(request_id, body, is_successful) {
        CompletionOutcome::Delivered | CompletionOutcome::Placeholder => {}
        CompletionOutcome::Orphaned(reason) => {
            tracing::debug!(request_id = %request_id, ?reason, "Acknowledging orphaned completion");
        }
    }
    StatusCode::NO_CONTENT
}

/// POST /{version}/runtime/init/error
async fn init_error(State(state): State<RuntimeApiState>, body: Bytes) -> StatusCode {
    state.correlator.fail_initialization(body);
    StatusCode::NO_CONTENT
}

async fn unhandled(req: Request) -> StatusCode {
    tracing::warn!(
        method = %req.method(),
        uri = %req.uri(),
        "Unhandled request"
    );
    StatusCode::NOT_FOUND
}
