//! Function identity and server options.
//!
//! Options are layered with figment, in order of priority:
//! 1. Default values (compiled in)
//! 2. Config file: `lambda-test-server.toml` in the working directory (optional)
//! 3. Environment variables with the `LAMBDA_TEST_SERVER_` prefix
//!
//! Field names map directly onto variable names, so
//! `LAMBDA_TEST_SERVER_FUNCTION_MEMORY_SIZE=256` sets `function_memory_size`.

use crate::error::{ConfigError, ServerError, ServerResult};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "lambda-test-server.toml";
const ENV_PREFIX: &str = "LAMBDA_TEST_SERVER_";

/// Function metadata reported to the runtime, plus server behaviour switches.
///
/// The function fields mirror what the Lambda service sets for a real
/// deployment: they show up in the `/next` headers and in the environment
/// published for the runtime client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Invoked function ARN sent with every invocation.
    pub function_arn: String,

    /// `AWS_LAMBDA_FUNCTION_NAME`.
    pub function_name: String,

    /// `_HANDLER`. Empty by default.
    pub function_handler: String,

    /// `AWS_LAMBDA_FUNCTION_MEMORY_SIZE`, in MB.
    pub function_memory_size: u32,

    /// Used to compute each invocation's deadline. Not enforced.
    #[serde(with = "duration_ms")]
    pub function_timeout: Duration,

    /// `AWS_LAMBDA_FUNCTION_VERSION`.
    pub function_version: String,

    /// `AWS_LAMBDA_LOG_GROUP_NAME`.
    pub log_group_name: String,

    /// `AWS_LAMBDA_LOG_STREAM_NAME`.
    pub log_stream_name: String,

    /// Publishes `AWS_LAMBDA_DOTNET_DISABLE_MEMORY_LIMIT_CHECK=true`.
    pub disable_memory_limit_check: bool,

    /// Whether `start` overrides the process environment so an in-process
    /// runtime client finds the server.
    pub publish_environment: bool,

    /// Fixed port to bind. `None` lets the OS pick one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            function_arn: "arn:aws:lambda:eu-west-1:123456789012:function:test-function"
                .to_string(),
            function_name: "test-function".to_string(),
            function_handler: String::new(),
            function_memory_size: 128,
            function_timeout: Duration::from_secs(3),
            function_version: "1".to_string(),
            log_group_name: "test-function-log-group".to_string(),
            log_stream_name: "test-function-log-stream".to_string(),
            disable_memory_limit_check: false,
            publish_environment: true,
            port: None,
        }
    }
}

impl ServerOptions {
    /// Loads options from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed into options.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Loads options using a custom config file path.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed into options.
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(ServerOptions::default()));

        if config_path.as_ref().exists() {
            figment = figment.merge(Toml::file(config_path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        Ok(figment.extract()?)
    }

    /// Creates a new options builder.
    pub fn builder() -> ServerOptionsBuilder {
        ServerOptionsBuilder::new()
    }

    /// Checks that the options describe a function a runtime could run.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Validation` naming the first offending field.
    pub fn validate(&self) -> ServerResult<()> {
        if self.function_name.trim().is_empty() {
            return Err(ServerError::Validation(
                "function_name must not be empty".to_string(),
            ));
        }
        if self.function_arn.trim().is_empty() {
            return Err(ServerError::Validation(
                "function_arn must not be empty".to_string(),
            ));
        }
        if self.function_memory_size == 0 {
            return Err(ServerError::Validation(
                "function_memory_size must be greater than zero".to_string(),
            ));
        }
        if self.function_timeout.is_zero() {
            return Err(ServerError::Validation(
                "function_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ServerOptions`].
#[derive(Debug, Default)]
#[must_use = "builders do nothing unless .build() is called"]
pub struct ServerOptionsBuilder {
    options: ServerOptions,
}

impl ServerOptionsBuilder {
    /// Creates a builder starting from the default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the invoked function ARN.
    pub fn function_arn(mut self, arn: impl Into<String>) -> Self {
        self.options.function_arn = arn.into();
        self
    }

    /// Sets the function name.
    pub fn function_name(mut self, name: impl Into<String>) -> Self {
        self.options.function_name = name.into();
        self
    }

    /// Sets the handler string.
    pub fn function_handler(mut self, handler: impl Into<String>) -> Self {
        self.options.function_handler = handler.into();
        self
    }

    /// Sets the memory size in MB.
    pub fn function_memory_size(mut self, memory_mb: u32) -> Self {
        self.options.function_memory_size = memory_mb;
        self
    }

    /// Sets the function timeout.
    pub fn function_timeout(mut self, timeout: Duration) -> Self {
        self.options.function_timeout = timeout;
        self
    }

    /// Sets the function version.
    pub fn function_version(mut self, version: impl Into<String>) -> Self {
        self.options.function_version = version.into();
        self
    }

    /// Sets the log group name.
    pub fn log_group_name(mut self, name: impl Into<String>) -> Self {
        self.options.log_group_name = name.into();
        self
    }

    /// Sets the log stream name.
    pub fn log_stream_name(mut self, name: impl Into<String>) -> Self {
        self.options.log_stream_name = name.into();
        self
    }

    /// Disables the runtime's memory-limit check.
    pub fn disable_memory_limit_check(mut self, disable: bool) -> Self {
        self.options.disable_memory_limit_check = disable;
        self
    }

    /// Controls whether `start` publishes the process environment.
    pub fn publish_environment(mut self, publish: bool) -> Self {
        self.options.publish_environment = publish;
        self
    }

    /// Binds a fixed port instead of an ephemeral one.
    pub fn port(mut self, port: u16) -> Self {
        self.options.port = Some(port);
        self
    }

    /// Builds the options. Validation happens when the server starts.
    pub fn build(self) -> ServerOptions {
        self.options
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
