//! Error types for the Lambda test server.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by the test server's public operations.
#[derive(Error, Debug)]
pub enum ServerError {
    /// An argument or option was missing or invalid.
    #[error("Invalid argument: {0}")]
    Validation(String),

    /// The operation requires a started server.
    #[error("The test server has not been started")]
    NotStarted,

    /// `start` was called on a server that is already started or starting.
    #[error("The test server has already been started")]
    AlreadyStarted,

    /// The server has been disposed.
    #[error("The test server has been disposed")]
    Disposed,

    /// An invocation with the same request ID is still in-flight.
    #[error("A request with AWS request ID '{0}' is currently in-flight")]
    Conflict(String),

    /// The host started but exposed no address the runtime could connect to.
    #[error("No server addresses are available: {0}")]
    AddressResolution(String),

    /// The host failed to bind or start serving.
    #[error("Failed to bind the Runtime API host")]
    Bind(#[source] std::io::Error),

    /// The Runtime API client could not be constructed.
    #[error("Failed to create Runtime API client")]
    Client(#[from] crate::client::ClientError),
}

impl ServerError {
    /// Returns `true` for errors caused by calling an operation in the wrong
    /// lifecycle state.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            ServerError::NotStarted | ServerError::AlreadyStarted | ServerError::Disposed
        )
    }
}

/// Errors that can occur when building invocations or options.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    /// Required field is missing.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A field was supplied with an unusable value.
    #[error("Invalid value for {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl From<BuilderError> for ServerError {
    fn from(err: BuilderError) -> Self {
        ServerError::Validation(err.to_string())
    }
}

/// Errors observed while waiting for an invocation's response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    /// The server shut down before the function completed the invocation.
    #[error("The test server stopped before a response was received")]
    Closed,

    /// No response arrived within the caller's timeout.
    #[error("No response received within {0:?}")]
    Timeout(Duration),
}

/// Errors loading [`ServerOptions`](crate::ServerOptions) from files or the
/// environment.
#[derive(Error, Debug)]
#[error("configuration error")]
pub struct ConfigError(#[source] Box<figment::Error>);

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError(Box::new(err))
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
