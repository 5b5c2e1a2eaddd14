//! Invocation requests and responses exchanged with the function under test.

use crate::error::BuilderError;
use axum::http::HeaderValue;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use uuid::Uuid;

/// A unit of work to hand to the function under test.
///
/// The payload is passed to the runtime verbatim; serializing it is up to
/// the caller (see [`Invocation::from_json`] for the common JSON case).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// The AWS request ID the runtime will see.
    pub request_id: String,

    /// Raw request body.
    pub payload: Bytes,

    /// Serialized client context, as sent by the AWS Mobile SDK.
    pub client_context: Option<String>,

    /// Serialized Cognito identity, as sent by the AWS Mobile SDK.
    pub cognito_identity: Option<String>,
}

impl Invocation {
    /// Creates an invocation with a random request ID.
    ///
    /// # Examples
    ///
    /// ```
    /// use lambda_test_server::Invocation;
    ///
    /// let invocation = Invocation::new(r#"{"key":"value"}"#);
    /// assert!(!invocation.request_id.is_empty());
    /// ```
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            payload: payload.into(),
            client_context: None,
            cognito_identity: None,
        }
    }

    /// Creates an invocation whose payload is `value` serialized as JSON.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error if `value` cannot be represented as JSON.
    pub fn from_json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_vec(value)?))
    }

    /// Returns a builder for invocations with a custom ID or mobile SDK context.
    pub fn builder() -> InvocationBuilder {
        InvocationBuilder::new()
    }

    /// Checks that every field can make the round trip over the Runtime API.
    ///
    /// The request ID travels as one URL path segment of the completion
    /// routes and as a response header of `/next`, so it must be non-empty
    /// visible ASCII without `/`, `\`, `?`, `#` or `%`. The mobile SDK
    /// contexts travel as headers and must be printable ASCII.
    ///
    /// # Errors
    ///
    /// Returns `BuilderError::InvalidField` naming the offending field.
    pub fn validate(&self) -> Result<(), BuilderError> {
        if let Some(reason) = request_id_problem(&self.request_id) {
            return Err(BuilderError::InvalidField {
                field: "request_id",
                reason: reason.to_string(),
            });
        }

        let contexts = [
            ("client_context", &self.client_context),
            ("cognito_identity", &self.cognito_identity),
        ];
        for (field, value) in contexts {
            if let Some(value) = value
                && !is_header_text(value)
            {
                return Err(BuilderError::InvalidField {
                    field,
                    reason: "must be printable ASCII".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Builder for creating invocations with custom properties.
#[derive(Debug, Default)]
#[must_use = "builders do nothing unless .build() is called"]
pub struct InvocationBuilder {
    payload: Option<Bytes>,
    request_id: Option<String>,
    client_context: Option<String>,
    cognito_identity: Option<String>,
}

impl InvocationBuilder {
    /// Creates a new invocation builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the raw payload.
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Sets the payload to a JSON value.
    pub fn json(mut self, value: &serde_json::Value) -> Self {
        self.payload = Some(Bytes::from(value.to_string()));
        self
    }

    /// Sets the request ID instead of generating one.
    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Sets the client context.
    pub fn client_context(mut self, context: impl Into<String>) -> Self {
        self.client_context = Some(context.into());
        self
    }

    /// Sets the Cognito identity.
    pub fn cognito_identity(mut self, identity: impl Into<String>) -> Self {
        self.cognito_identity = Some(identity.into());
        self
    }

    /// Builds the invocation.
    ///
    /// # Errors
    ///
    /// Returns `BuilderError::MissingField` if no payload was provided, or
    /// `BuilderError::InvalidField` if a field cannot be sent over the
    /// Runtime API (see [`Invocation::validate`]).
    ///
    /// # Examples
    ///
    /// ```
    /// use lambda_test_server::InvocationBuilder;
    ///
    /// let invocation = InvocationBuilder::new()
    ///     .payload(r#"{"Values":[1,2,3]}"#)
    ///     .request_id("my-request")
    ///     .client_context("{}")
    ///     .build()
    ///     .expect("Failed to build invocation");
    ///
    /// assert_eq!(invocation.request_id, "my-request");
    /// ```
    pub fn build(self) -> Result<Invocation, BuilderError> {
        let payload = self
            .payload
            .ok_or(BuilderError::MissingField("payload"))?;

        let invocation = Invocation {
            request_id: self
                .request_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            payload,
            client_context: self.client_context,
            cognito_identity: self.cognito_identity,
        };
        invocation.validate()?;
        Ok(invocation)
    }
}

fn request_id_problem(request_id: &str) -> Option<&'static str> {
    if request_id.trim().is_empty() {
        return Some("must not be blank");
    }
    if !request_id.chars().all(|c| c.is_ascii_graphic()) {
        return Some("must contain only visible ASCII characters");
    }
    if request_id.contains(['/', '\\', '?', '#', '%']) || matches!(request_id, "." | "..") {
        return Some("must be a single URL path segment");
    }
    None
}

fn is_header_text(value: &str) -> bool {
    HeaderValue::from_str(value).is_ok_and(|header| header.to_str().is_ok())
}

/// Headers sent alongside a dispatched invocation on `/invocation/next`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeHeaders {
    /// `Lambda-Runtime-Aws-Request-Id`.
    pub request_id: String,

    /// `Lambda-Runtime-Invoked-Function-Arn`.
    pub invoked_function_arn: String,

    /// `Lambda-Runtime-Trace-Id`, unique per dispatch.
    pub trace_id: String,

    /// `Lambda-Runtime-Deadline-Ms`.
    pub deadline: DateTime<Utc>,

    /// `Lambda-Runtime-Client-Context`, only if the invocation carried one.
    pub client_context: Option<String>,

    /// `Lambda-Runtime-Cognito-Identity`, only if the invocation carried one.
    pub cognito_identity: Option<String>,
}

impl RuntimeHeaders {
    /// Returns the deadline as milliseconds since the Unix epoch.
    pub fn deadline_ms(&self) -> i64 {
        self.deadline.timestamp_millis()
    }
}

/// Generates an AWS X-Ray trace ID.
///
/// Format: `Root=1-{8-hex-time}-{24-hex-random}`.
pub(crate) fn generate_trace_id(timestamp: DateTime<Utc>) -> String {
    let epoch_time = timestamp.timestamp() as u32;
    let random_hex = format!("{:032x}", Uuid::new_v4().as_u128());

    format!("Root=1-{:08x}-{}", epoch_time, &random_hex[..24])
}

/// The function's answer to one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResponse {
    /// Raw body posted by the runtime.
    pub content: Bytes,

    /// `true` for `/response`, `false` for `/error`.
    pub is_successful: bool,

    /// Time between dispatch on `/next` and the runtime's callback.
    pub duration: Duration,
}

impl InvocationResponse {
    /// Returns the content decoded as UTF-8, replacing invalid sequences.
    pub fn read_as_string(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    /// Deserializes the content as JSON.
    ///
    /// # Errors
    ///
    /// Returns the deserializer's error if the content is not valid JSON for `T`.
    pub fn read_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn builder_without_payload_fails() {
        let result = InvocationBuilder::new().request_id("abc").build();
        assert_eq!(result, Err(BuilderError::MissingField("payload")));
    }

    #[test]
    fn builder_rejects_blank_request_id() {
        let result = InvocationBuilder::new().payload("{}").request_id("  ").build();
        assert!(matches!(
            result,
            Err(BuilderError::InvalidField {
                field: "request_id",
                ..
            })
        ));
    }

    #[test]
    fn builder_rejects_ids_that_cannot_be_routed() {
        for id in ["a/b", "a?b", "a#b", "a%2Fb", "a\\b", "..", "line\nbreak", "tab\tbed", "caf\u{e9}"] {
            let result = InvocationBuilder::new().payload("{}").request_id(id).build();
            assert!(
                matches!(
                    result,
                    Err(BuilderError::InvalidField {
                        field: "request_id",
                        ..
                    })
                ),
                "{id:?} was accepted"
            );
        }
    }

    #[test]
    fn builder_rejects_contexts_that_are_not_header_text() {
        let result = InvocationBuilder::new()
            .payload("{}")
            .client_context("{\"a\":\"\u{1}\"}")
            .build();
        assert!(matches!(
            result,
            Err(BuilderError::InvalidField {
                field: "client_context",
                ..
            })
        ));

        let result = InvocationBuilder::new()
            .payload("{}")
            .cognito_identity("\u{2603}")
            .build();
        assert!(matches!(
            result,
            Err(BuilderError::InvalidField {
                field: "cognito_identity",
                ..
            })
        ));
    }

    #[test]
    fn validate_accepts_generated_and_typical_ids() {
        assert!(Invocation::new("{}").validate().is_ok());
        let invocation = InvocationBuilder::new()
            .payload("{}")
            .request_id("8476a536-e9f4-11e8-9739-2dfe598c3fcd")
            .client_context(r#"{"client":{"app_title":"demo app"}}"#)
            .build()
            .unwrap();
        assert!(invocation.validate().is_ok());
    }

    #[test]
    fn from_json_serializes_payload() {
        let invocation = Invocation::from_json(&[1, 2, 3]).unwrap();
        assert_eq!(invocation.payload, Bytes::from_static(b"[1,2,3]"));
    }

    #[test]
    fn response_helpers_decode_content() {
        let response = InvocationResponse {
            content: Bytes::from_static(br#"{"Sum":6}"#),
            is_successful: true,
            duration: Duration::from_millis(3),
        };

        assert_eq!(response.read_as_string(), r#"{"Sum":6}"#);
        let value: serde_json::Value = response.read_as().unwrap();
        assert_eq!(value["Sum"], 6);
        assert!(response.read_as::<Vec<u8>>().is_err());
    }

    proptest! {
        #[test]
        fn generated_request_ids_are_unique(payload in proptest::collection::vec(any::<u8>(), 0..64)) {
            let first = Invocation::new(payload.clone());
            let second = Invocation::new(payload);

            prop_assert!(!first.request_id.is_empty());
            prop_assert_ne!(first.request_id, second.request_id);
        }

        #[test]
        fn trace_id_format_is_valid(seconds in 0i64..=4_000_000_000i64) {
            let timestamp = DateTime::<Utc>::from_timestamp(seconds, 0).unwrap();
            let trace_id = generate_trace_id(timestamp);

            prop_assert!(trace_id.starts_with("Root=1-"));
            let parts: Vec<_> = trace_id.split('-').collect();
            prop_assert_eq!(parts.len(), 3);
            prop_assert_eq!(parts[1].len(), 8);
            prop_assert_eq!(parts[2].len(), 24);
        }

        #[test]
        fn builder_keeps_supplied_fields(id in "[a-z0-9-]{1,36}", context in "\\{[a-z]{0,8}\\}") {
            let invocation = InvocationBuilder::new()
                .payload("{}")
                .request_id(id.clone())
                .client_context(context.clone())
                .build()
                .unwrap();

            prop_assert_eq!(invocation.request_id, id);
            prop_assert_eq!(invocation.client_context, Some(context));
            prop_assert_eq!(invocation.cognito_identity, None);
        }
    }
}
