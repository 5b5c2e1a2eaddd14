//! A minimal Runtime API client for driving a function loop by hand.

use crate::correlator::SHUTDOWN_REQUEST_ID;
use crate::runtime_api::{
    CLIENT_CONTEXT_HEADER, COGNITO_IDENTITY_HEADER, DEADLINE_HEADER, FUNCTION_ARN_HEADER,
    REQUEST_ID_HEADER, TRACE_ID_HEADER,
};
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use thiserror::Error;

const API_VERSION: &str = "2018-06-01";

/// Errors talking to the Runtime API.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The request could not be sent or the body could not be read.
    #[error("Runtime API request failed")]
    Transport(#[from] reqwest::Error),

    /// The server answered with an unexpected status.
    #[error("{route} returned unexpected status {status}")]
    UnexpectedStatus {
        /// Route that was called.
        route: &'static str,
        /// Status received.
        status: StatusCode,
    },

    /// A required header was missing from `/next`.
    #[error("Missing required header {0}")]
    MissingHeader(&'static str),
}

/// An invocation received from `/next`.
#[derive(Debug, Clone)]
pub struct NextInvocation {
    /// `Lambda-Runtime-Aws-Request-Id`.
    pub request_id: String,

    /// All response headers.
    pub headers: HeaderMap,

    /// Raw payload.
    pub body: Bytes,
}

impl NextInvocation {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `Lambda-Runtime-Trace-Id`.
    pub fn trace_id(&self) -> Option<&str> {
        self.header(TRACE_ID_HEADER)
    }

    /// `Lambda-Runtime-Invoked-Function-Arn`.
    pub fn function_arn(&self) -> Option<&str> {
        self.header(FUNCTION_ARN_HEADER)
    }

    /// `Lambda-Runtime-Deadline-Ms`, parsed.
    pub fn deadline_ms(&self) -> Option<i64> {
        self.header(DEADLINE_HEADER).and_then(|v| v.parse().ok())
    }

    /// `Lambda-Runtime-Client-Context`, if sent.
    pub fn client_context(&self) -> Option<&str> {
        self.header(CLIENT_CONTEXT_HEADER)
    }

    /// `Lambda-Runtime-Cognito-Identity`, if sent.
    pub fn cognito_identity(&self) -> Option<&str> {
        self.header(COGNITO_IDENTITY_HEADER)
    }

    /// Returns `true` if the server is shutting down and this is not real work.
    pub fn is_shutdown_placeholder(&self) -> bool {
        self.request_id == SHUTDOWN_REQUEST_ID
    }
}

/// HTTP client bound to one test server.
#[derive(Debug, Clone)]
pub struct RuntimeApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl RuntimeApiClient {
    /// Creates a client for `base_url` (for example `http://127.0.0.1:9001`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().http1_only().build()?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    /// The base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Long-polls for the next invocation.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-200 status, or a missing
    /// request ID header.
    pub async fn next_invocation(&self) -> Result<NextInvocation, ClientError> {
        let url = format!("{}/{API_VERSION}/runtime/invocation/next", self.base_url);
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(ClientError::UnexpectedStatus {
                route: "/runtime/invocation/next",
                status,
            });
        }

        let headers = resp.headers().clone();
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ClientError::MissingHeader(REQUEST_ID_HEADER))?
            .to_string();

        let body = resp.bytes().await?;

        Ok(NextInvocation {
            request_id,
            headers,
            body,
        })
    }

    /// Posts a successful response for `request_id`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn send_response(
        &self,
        request_id: &str,
        body: impl Into<Bytes>,
    ) -> Result<(), ClientError> {
        let url = format!(
            "{}/{API_VERSION}/runtime/invocation/{request_id}/response",
            self.base_url
        );
        self.post(url, "/runtime/invocation/{id}/response", body.into())
            .await
    }

    /// Posts an error document for `request_id`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn send_error(
        &self,
        request_id: &str,
        body: impl Into<Bytes>,
    ) -> Result<(), ClientError> {
        let url = format!(
            "{}/{API_VERSION}/runtime/invocation/{request_id}/error",
            self.base_url
        );
        self.post(url, "/runtime/invocation/{id}/error", body.into())
            .await
    }

    /// Reports an initialization failure.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn send_init_error(&self, body: impl Into<Bytes>) -> Result<(), ClientError> {
        let url = format!("{}/{API_VERSION}/runtime/init/error", self.base_url);
        self.post(url, "/runtime/init/error", body.into()).await
    }

    async fn post(&self, url: String, route: &'static str, body: Bytes) -> Result<(), ClientError> {
        let resp = self.http.post(url).body(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::UnexpectedStatus { route, status });
        }
        Ok(())
    }
}
