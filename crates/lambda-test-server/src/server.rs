//! Lifecycle of the test server: start, enqueue, dispose.

use crate::client::RuntimeApiClient;
use crate::config::ServerOptions;
use crate::correlator::{CompletionCallback, Correlator, OrphanedCompletion};
use crate::environment::{EnvironmentOverride, lambda_environment_variables};
use crate::error::{ServerError, ServerResult};
use crate::host::{RunningHost, RuntimeHost, TcpHost};
use crate::invocation::Invocation;
use crate::runtime_api::{RuntimeApiState, create_runtime_api_router};
use crate::slot::InvocationContext;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where the server is in its one-way lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    /// Constructed, not yet serving.
    Created,
    /// `start` is binding the host.
    Starting,
    /// Serving the Runtime API.
    Started,
    /// Shut down. Terminal.
    Disposed,
}

enum ServerState {
    Created,
    Starting,
    Started(Running),
    Disposed,
}

impl ServerState {
    fn phase(&self) -> ServerPhase {
        match self {
            ServerState::Created => ServerPhase::Created,
            ServerState::Starting => ServerPhase::Starting,
            ServerState::Started(_) => ServerPhase::Started,
            ServerState::Disposed => ServerPhase::Disposed,
        }
    }
}

struct Running {
    correlator: Arc<Correlator>,
    addr: SocketAddr,
    host: RunningHost,
    environment: Option<EnvironmentOverride>,
}

impl Running {
    fn stop(self) {
        self.correlator.shutdown();
        // The serving task winds down on its own once in-flight long polls
        // have answered with the shutdown placeholder.
        drop(self.host);
        if let Some(environment) = self.environment {
            environment.restore();
        }
    }
}

/// Builder for [`LambdaTestServer`].
///
/// # Examples
///
/// ```
/// use lambda_test_server::{LambdaTestServer, ServerOptions};
///
/// let server = LambdaTestServer::builder()
///     .options(ServerOptions::builder().function_name("my-function").build())
///     .on_invocation_completed(|request_id, success| {
///         println!("{request_id} completed (success: {success})");
///     })
///     .build();
/// ```
#[must_use = "builders do nothing unless .build() is called"]
#[derive(Default)]
pub struct LambdaTestServerBuilder {
    options: ServerOptions,
    host: Option<Arc<dyn RuntimeHost>>,
    on_completed: Option<CompletionCallback>,
}

impl std::fmt::Debug for LambdaTestServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LambdaTestServerBuilder")
            .field("options", &self.options)
            .field("custom_host", &self.host.is_some())
            .field("on_completed", &self.on_completed.is_some())
            .finish()
    }
}

impl LambdaTestServerBuilder {
    /// Creates a builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the function options.
    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Serves the Runtime API from a custom host instead of loopback TCP.
    pub fn host(mut self, host: impl RuntimeHost + 'static) -> Self {
        self.host = Some(Arc::new(host));
        self
    }

    /// Registers a callback run with `(request_id, is_successful)` after
    /// every real completion.
    pub fn on_invocation_completed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        self.on_completed = Some(Arc::new(callback));
        self
    }

    /// Builds the server. Nothing is bound until [`LambdaTestServer::start`].
    pub fn build(self) -> LambdaTestServer {
        let host = self
            .host
            .unwrap_or_else(|| Arc::new(TcpHost::loopback(self.options.port.unwrap_or(0))));

        LambdaTestServer {
            options: Arc::new(self.options),
            host,
            on_completed: self.on_completed,
            state: Mutex::new(ServerState::Created),
        }
    }
}

/// An in-process Lambda Runtime API for exercising function code.
///
/// Enqueue invocations, point a runtime client at the server (published in
/// the process environment by default), and await each invocation's
/// response.
///
/// # Examples
///
/// ```no_run
/// use lambda_test_server::{LambdaTestServer, ServerOptions};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let server = LambdaTestServer::new(ServerOptions::default());
/// server.start(&CancellationToken::new()).await?;
///
/// let context = server.enqueue_json(&serde_json::json!({"Values": [1, 2, 3]}))?;
/// // ... run the function under test against AWS_LAMBDA_RUNTIME_API ...
/// let response = context.response.recv().await?;
/// println!("{}", response.read_as_string());
///
/// server.dispose();
/// # Ok(())
/// # }
/// ```
pub struct LambdaTestServer {
    options: Arc<ServerOptions>,
    host: Arc<dyn RuntimeHost>,
    on_completed: Option<CompletionCallback>,
    state: Mutex<ServerState>,
}

impl std::fmt::Debug for LambdaTestServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LambdaTestServer")
            .field("function_name", &self.options.function_name)
            .field("phase", &self.phase())
            .field("addr", &self.addr().ok())
            .finish_non_exhaustive()
    }
}

/// Reverts `Starting` to `Created` if `start` does not finish.
struct StartGuard<'a> {
    state: &'a Mutex<ServerState>,
    armed: bool,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock();
            if matches!(*state, ServerState::Starting) {
                *state = ServerState::Created;
            }
        }
    }
}

impl LambdaTestServer {
    /// Creates a server serving on loopback TCP.
    pub fn new(options: ServerOptions) -> Self {
        Self::builder().options(options).build()
    }

    /// Creates a new server builder.
    pub fn builder() -> LambdaTestServerBuilder {
        LambdaTestServerBuilder::new()
    }

    /// Validates the options, begins serving and publishes the environment.
    ///
    /// The server's shutdown signal is a child of `cancel`. Cancelling it
    /// shuts the engine down: long polls get the shutdown placeholder,
    /// waiting callers see `ResponseError::Closed` and further enqueues fail
    /// with `ServerError::Disposed`. The environment stays published until
    /// [`dispose`](Self::dispose).
    ///
    /// # Errors
    ///
    /// - `ServerError::AlreadyStarted` / `ServerError::Disposed` if the server
    ///   is not freshly created.
    /// - `ServerError::Validation` for unusable options, before binding.
    /// - `ServerError::Bind` if the host fails to start.
    /// - `ServerError::AddressResolution` if the host reports no usable
    ///   address. The host is released and the server can be started again.
    pub async fn start(&self, cancel: &CancellationToken) -> ServerResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                ServerState::Created => *state = ServerState::Starting,
                ServerState::Starting | ServerState::Started(_) => {
                    return Err(ServerError::AlreadyStarted);
                }
                ServerState::Disposed => return Err(ServerError::Disposed),
            }
        }

        let mut guard = StartGuard {
            state: &self.state,
            armed: true,
        };
        let running = self.launch(cancel).await?;
        guard.armed = false;

        let mut state = self.state.lock();
        if matches!(*state, ServerState::Disposed) {
            drop(state);
            running.stop();
            return Err(ServerError::Disposed);
        }

        tracing::info!(
            addr = %running.addr,
            function_name = %self.options.function_name,
            function_arn = %self.options.function_arn,
            "Lambda test server started"
        );
        *state = ServerState::Started(running);
        Ok(())
    }

    async fn launch(&self, cancel: &CancellationToken) -> ServerResult<Running> {
        self.options.validate()?;

        let shutdown = cancel.child_token();
        let correlator = Arc::new(Correlator::new(
            Arc::clone(&self.options),
            shutdown.clone(),
            self.on_completed.clone(),
        ));
        let router = create_runtime_api_router(RuntimeApiState {
            correlator: Arc::clone(&correlator),
            shutdown: shutdown.clone(),
        });

        let host = self
            .host
            .serve(router, shutdown.clone())
            .await
            .map_err(ServerError::Bind)?;

        let Some(addr) = host.runtime_address() else {
            let reported = format!("{:?}", host.addresses());
            shutdown.cancel();
            host.abort();
            tracing::error!(addresses = %reported, "Runtime API host reported no usable address");
            return Err(ServerError::AddressResolution(format!(
                "host reported {reported}"
            )));
        };

        // Caller cancellation shuts the correlator down as well.
        tokio::spawn({
            let correlator = Arc::clone(&correlator);
            async move {
                shutdown.cancelled().await;
                correlator.shutdown();
            }
        });

        let environment = self.options.publish_environment.then(|| {
            EnvironmentOverride::apply(lambda_environment_variables(&self.options, addr))
        });

        Ok(Running {
            correlator,
            addr,
            host,
            environment,
        })
    }

    /// Queues an invocation for the function.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::NotStarted` / `ServerError::Disposed` outside the
    /// started phase, and `ServerError::Conflict` if the request ID is still
    /// in-flight.
    pub fn enqueue(&self, invocation: Invocation) -> ServerResult<InvocationContext> {
        self.correlator()?.enqueue(invocation)
    }

    /// Queues a raw payload under a fresh request ID.
    ///
    /// # Errors
    ///
    /// As [`enqueue`](Self::enqueue).
    pub fn enqueue_payload(&self, payload: impl Into<Bytes>) -> ServerResult<InvocationContext> {
        self.enqueue(Invocation::new(payload))
    }

    /// Queues `value` serialized as JSON under a fresh request ID.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Validation` if `value` cannot be serialized,
    /// otherwise as [`enqueue`](Self::enqueue).
    pub fn enqueue_json<T: Serialize + ?Sized>(&self, value: &T) -> ServerResult<InvocationContext> {
        let invocation = Invocation::from_json(value)
            .map_err(|e| ServerError::Validation(format!("payload is not valid JSON: {e}")))?;
        self.enqueue(invocation)
    }

    /// Returns a client bound to this server's Runtime API.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::NotStarted` / `ServerError::Disposed` outside the
    /// started phase.
    pub fn create_client(&self) -> ServerResult<RuntimeApiClient> {
        Ok(RuntimeApiClient::new(self.runtime_api_url()?)?)
    }

    /// Shuts the server down. Idempotent, and also run on drop.
    ///
    /// Long polls return the shutdown placeholder, every waiting caller sees
    /// `ResponseError::Closed`, and the published environment is restored.
    pub fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), ServerState::Disposed);
        match previous {
            ServerState::Started(running) => {
                let addr = running.addr;
                running.stop();
                tracing::info!(addr = %addr, "Lambda test server disposed");
            }
            ServerState::Created | ServerState::Starting => {
                tracing::debug!("Lambda test server disposed before serving");
            }
            ServerState::Disposed => {}
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ServerPhase {
        self.state.lock().phase()
    }

    /// Returns `true` while the server is serving.
    pub fn is_started(&self) -> bool {
        self.phase() == ServerPhase::Started
    }

    /// The options this server was built with.
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// The address runtimes connect to.
    ///
    /// # Errors
    ///
    /// Returns a state error outside the started phase.
    pub fn addr(&self) -> ServerResult<SocketAddr> {
        self.with_running(|running| running.addr)
    }

    /// Base URL of the Runtime API, e.g. `http://127.0.0.1:40213`.
    ///
    /// # Errors
    ///
    /// Returns a state error outside the started phase.
    pub fn runtime_api_url(&self) -> ServerResult<String> {
        Ok(format!("http://{}", self.addr()?))
    }

    /// The environment a runtime process needs to reach this server.
    ///
    /// Pass these to a spawned `bootstrap` when publication into this
    /// process is turned off.
    ///
    /// # Errors
    ///
    /// Returns a state error outside the started phase.
    #[must_use = "the variables are only useful when passed to a runtime"]
    pub fn lambda_env_vars(&self) -> ServerResult<HashMap<String, String>> {
        let addr = self.addr()?;
        Ok(lambda_environment_variables(&self.options, addr))
    }

    /// The most recent body posted to `/runtime/init/error`.
    pub fn init_error(&self) -> Option<Bytes> {
        self.with_running(|running| running.correlator.init_error())
            .ok()
            .flatten()
    }

    /// Completions that could not be matched to a waiting caller.
    pub fn orphaned_completions(&self) -> Vec<OrphanedCompletion> {
        self.with_running(|running| running.correlator.orphaned_completions())
            .unwrap_or_default()
    }

    /// Invocations enqueued and not yet completed.
    pub fn in_flight_count(&self) -> usize {
        self.with_running(|running| running.correlator.in_flight_count())
            .unwrap_or_default()
    }

    fn correlator(&self) -> ServerResult<Arc<Correlator>> {
        self.with_running(|running| Arc::clone(&running.correlator))
    }

    fn with_running<T>(&self, f: impl FnOnce(&Running) -> T) -> ServerResult<T> {
        match &*self.state.lock() {
            ServerState::Started(running) => Ok(f(running)),
            ServerState::Created | ServerState::Starting => Err(ServerError::NotStarted),
            ServerState::Disposed => Err(ServerError::Disposed),
        }
    }
}

impl Drop for LambdaTestServer {
    fn drop(&mut self) {
        self.dispose();
    }
}
