//! Publishing the function environment for an in-process runtime client.
//!
//! Runtime clients discover the Runtime API through `AWS_LAMBDA_RUNTIME_API`
//! and read the function metadata from the other `AWS_LAMBDA_*` variables.
//! [`EnvironmentOverride`] sets those for the life of a server and puts back
//! whatever was there before.

use crate::config::ServerOptions;
use parking_lot::{Mutex, const_mutex};
use std::collections::HashMap;
use std::ffi::OsString;
use std::net::SocketAddr;

/// `AWS_LAMBDA_FUNCTION_MEMORY_SIZE`.
pub const FUNCTION_MEMORY_SIZE: &str = "AWS_LAMBDA_FUNCTION_MEMORY_SIZE";
/// `AWS_LAMBDA_FUNCTION_NAME`.
pub const FUNCTION_NAME: &str = "AWS_LAMBDA_FUNCTION_NAME";
/// `AWS_LAMBDA_FUNCTION_VERSION`.
pub const FUNCTION_VERSION: &str = "AWS_LAMBDA_FUNCTION_VERSION";
/// `AWS_LAMBDA_LOG_GROUP_NAME`.
pub const LOG_GROUP_NAME: &str = "AWS_LAMBDA_LOG_GROUP_NAME";
/// `AWS_LAMBDA_LOG_STREAM_NAME`.
pub const LOG_STREAM_NAME: &str = "AWS_LAMBDA_LOG_STREAM_NAME";
/// `AWS_LAMBDA_RUNTIME_API`, as `host:port`.
pub const RUNTIME_API: &str = "AWS_LAMBDA_RUNTIME_API";
/// `_HANDLER`.
pub const HANDLER: &str = "_HANDLER";
/// Disables the .NET runtime's memory-limit check.
pub const DISABLE_MEMORY_LIMIT_CHECK: &str = "AWS_LAMBDA_DOTNET_DISABLE_MEMORY_LIMIT_CHECK";

/// Every variable the server may publish.
pub const LAMBDA_ENVIRONMENT_VARIABLES: [&str; 8] = [
    FUNCTION_MEMORY_SIZE,
    FUNCTION_NAME,
    FUNCTION_VERSION,
    LOG_GROUP_NAME,
    LOG_STREAM_NAME,
    RUNTIME_API,
    HANDLER,
    DISABLE_MEMORY_LIMIT_CHECK,
];

static ENV_LOCK: Mutex<()> = const_mutex(());

/// Builds the variables a runtime needs to reach a server at `addr`.
pub fn lambda_environment_variables(
    options: &ServerOptions,
    addr: SocketAddr,
) -> HashMap<String, String> {
    let mut env = HashMap::new();

    env.insert(
        FUNCTION_MEMORY_SIZE.to_string(),
        options.function_memory_size.to_string(),
    );
    env.insert(FUNCTION_NAME.to_string(), options.function_name.clone());
    env.insert(FUNCTION_VERSION.to_string(), options.function_version.clone());
    env.insert(LOG_GROUP_NAME.to_string(), options.log_group_name.clone());
    env.insert(LOG_STREAM_NAME.to_string(), options.log_stream_name.clone());
    env.insert(RUNTIME_API.to_string(), addr.to_string());
    env.insert(HANDLER.to_string(), options.function_handler.clone());

    if options.disable_memory_limit_check {
        env.insert(DISABLE_MEMORY_LIMIT_CHECK.to_string(), "true".to_string());
    }

    env
}

/// Removes every variable in [`LAMBDA_ENVIRONMENT_VARIABLES`] from the process.
///
/// Useful between tests that start servers with publication enabled.
pub fn clear_lambda_environment_variables() {
    let _guard = ENV_LOCK.lock();
    for key in LAMBDA_ENVIRONMENT_VARIABLES {
        // SAFETY: Mutations go through ENV_LOCK; callers must not read the
        // environment from other threads while servers start or stop.
        unsafe { std::env::remove_var(key) };
    }
}

/// Scoped override of process environment variables.
///
/// Applying captures each variable's prior value; [`restore`](Self::restore)
/// or dropping the override puts them back.
#[derive(Debug)]
#[must_use = "the environment is restored when the override is dropped"]
pub struct EnvironmentOverride {
    previous: Vec<(String, Option<OsString>)>,
}

impl EnvironmentOverride {
    /// Sets every `(key, value)` pair, remembering what was there before.
    pub fn apply<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<OsString>,
    {
        let _guard = ENV_LOCK.lock();
        let mut previous: Vec<(String, Option<OsString>)> = Vec::new();

        for (key, value) in vars {
            let key = key.into();
            if !previous.iter().any(|(seen, _)| *seen == key) {
                previous.push((key.clone(), std::env::var_os(&key)));
            }
            // SAFETY: Mutations go through ENV_LOCK; callers must not read
            // the environment from other threads while servers start or stop.
            unsafe { std::env::set_var(&key, value.into()) };
        }

        tracing::debug!(
            variables = previous.len(),
            "Published Lambda environment variables"
        );
        Self { previous }
    }

    /// Keys this override set.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.previous.iter().map(|(key, _)| key.as_str())
    }

    /// Puts back the values captured by [`apply`](Self::apply).
    pub fn restore(mut self) {
        self.restore_in_place();
    }

    fn restore_in_place(&mut self) {
        if self.previous.is_empty() {
            return;
        }

        let _guard = ENV_LOCK.lock();
        for (key, value) in self.previous.drain(..).rev() {
            // SAFETY: Mutations go through ENV_LOCK; callers must not read
            // the environment from other threads while servers start or stop.
            unsafe {
                match value {
                    Some(value) => std::env::set_var(&key, value),
                    None => std::env::remove_var(&key),
                }
            }
        }
        tracing::debug!("Restored Lambda environment variables");
    }
}

impl Drop for EnvironmentOverride {
    fn drop(&mut self) {
        self.restore_in_place();
    }
}
