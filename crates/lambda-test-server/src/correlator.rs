//! The pending-work queue and in-flight slot table behind the Runtime API.
//!
//! A [`Correlator`] implements the protocol operations independent of HTTP:
//! enqueue, the long-poll `next`, completion by request ID, init failure and
//! shutdown. The router in [`crate::runtime_api`] is a thin rendering of it.

use crate::config::ServerOptions;
use crate::error::{ServerError, ServerResult};
use crate::invocation::{Invocation, RuntimeHeaders, generate_trace_id};
use crate::slot::{InvocationContext, ResponseSlot};
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Request ID handed to a runtime polling `/next` after shutdown.
pub const SHUTDOWN_REQUEST_ID: &str = "xx-lambda-test-server-stopped-xx";

const SHUTDOWN_PAYLOAD: &[u8] = b"{}";

/// Called with `(request_id, is_successful)` once per delivered completion.
pub type CompletionCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// An invocation as rendered to the runtime by `/next`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedInvocation {
    /// Values for the `Lambda-Runtime-*` response headers.
    pub headers: RuntimeHeaders,

    /// Response body.
    pub payload: Bytes,
}

/// Result of a `/next` poll. Never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A queued invocation, now in-flight.
    Invocation(DispatchedInvocation),

    /// The server is shutting down or the caller gave up. Carries
    /// [`SHUTDOWN_REQUEST_ID`] and an empty JSON object so the runtime loop
    /// can complete it harmlessly.
    ShutdownPlaceholder(DispatchedInvocation),
}

impl Dispatch {
    /// The invocation to render, whichever variant this is.
    pub fn invocation(&self) -> &DispatchedInvocation {
        match self {
            Dispatch::Invocation(dispatched) | Dispatch::ShutdownPlaceholder(dispatched) => {
                dispatched
            }
        }
    }

    /// Consumes the dispatch, returning the invocation to render.
    pub fn into_invocation(self) -> DispatchedInvocation {
        match self {
            Dispatch::Invocation(dispatched) | Dispatch::ShutdownPlaceholder(dispatched) => {
                dispatched
            }
        }
    }

    /// Returns `true` for the shutdown placeholder.
    pub fn is_shutdown_placeholder(&self) -> bool {
        matches!(self, Dispatch::ShutdownPlaceholder(_))
    }
}

/// Why a completion found no slot to write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanReason {
    /// The invocation was already completed once.
    AlreadyCompleted,

    /// The slot was force-closed by shutdown.
    ForceClosed,

    /// The invocation is still queued; `/next` has not handed it out. The
    /// slot is left in place for the real completion.
    NotDispatched,

    /// The ID was never enqueued.
    Unknown,
}

/// A completion that could not be correlated. Recorded for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedCompletion {
    /// The request ID in the callback URL.
    pub request_id: String,

    /// Whether it arrived on `/response` or `/error`.
    pub is_successful: bool,

    /// Why no slot was found.
    pub reason: OrphanReason,
}

/// What happened to a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Written to the caller's slot.
    Delivered,

    /// Completion of the shutdown placeholder. Discarded.
    Placeholder,

    /// No slot for this ID. Logged and recorded.
    Orphaned(OrphanReason),
}

/// How many completed or force-closed IDs are remembered for orphan
/// diagnostics. Older IDs are reported as [`OrphanReason::Unknown`].
const RETIRED_CAPACITY: usize = 4096;

/// How many orphaned completions are kept for inspection. The oldest are
/// discarded first.
pub const ORPHAN_CAPACITY: usize = 4096;

#[derive(Debug, Default)]
struct RetiredIds {
    reasons: HashMap<String, OrphanReason>,
    order: VecDeque<String>,
}

impl RetiredIds {
    fn insert(&mut self, request_id: String, reason: OrphanReason) {
        if self.reasons.insert(request_id.clone(), reason).is_none() {
            self.order.push_back(request_id);
        }
        while self.order.len() > RETIRED_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.reasons.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, request_id: &str) {
        if self.reasons.remove(request_id).is_some() {
            self.order.retain(|id| id != request_id);
        }
    }

    fn get(&self, request_id: &str) -> Option<OrphanReason> {
        self.reasons.get(request_id).copied()
    }
}

#[derive(Debug, Default)]
struct SlotTable {
    live: HashMap<String, ResponseSlot>,
    retired: RetiredIds,
    closed: bool,
}

/// Queue of pending invocations plus the slots their responses go into.
///
/// All operations are safe to call concurrently. Locks are never held across
/// an `.await`; when both are needed, `slots` is taken before `pending`.
pub struct Correlator {
    options: Arc<ServerOptions>,
    pending: Mutex<VecDeque<Invocation>>,
    slots: Mutex<SlotTable>,
    invocation_available: Notify,
    shutdown: CancellationToken,
    on_completed: Option<CompletionCallback>,
    init_error: Mutex<Option<Bytes>>,
    orphans: Mutex<VecDeque<OrphanedCompletion>>,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("function_arn", &self.options.function_arn)
            .field("pending", &self.pending_count())
            .field("in_flight", &self.in_flight_count())
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Correlator {
    /// Creates a correlator that stops long polls when `shutdown` fires.
    pub fn new(
        options: Arc<ServerOptions>,
        shutdown: CancellationToken,
        on_completed: Option<CompletionCallback>,
    ) -> Self {
        Self {
            options,
            pending: Mutex::new(VecDeque::new()),
            slots: Mutex::new(SlotTable::default()),
            invocation_available: Notify::new(),
            shutdown,
            on_completed,
            init_error: Mutex::new(None),
            orphans: Mutex::new(VecDeque::new()),
        }
    }

    /// Registers a slot for the invocation and queues it for dispatch.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Conflict` if the request ID is still in-flight,
    /// `ServerError::Validation` for a reserved ID or one that fails
    /// [`Invocation::validate`], and `ServerError::Disposed` once the
    /// shutdown signal has fired.
    pub fn enqueue(&self, invocation: Invocation) -> ServerResult<InvocationContext> {
        invocation.validate()?;
        if invocation.request_id == SHUTDOWN_REQUEST_ID {
            return Err(ServerError::Validation(format!(
                "request_id '{SHUTDOWN_REQUEST_ID}' is reserved"
            )));
        }

        let response = {
            let mut slots = self.slots.lock();
            if slots.closed || self.shutdown.is_cancelled() {
                return Err(ServerError::Disposed);
            }
            if slots.live.contains_key(&invocation.request_id) {
                return Err(ServerError::Conflict(invocation.request_id));
            }

            let (slot, response) = ResponseSlot::new();
            slots.retired.remove(&invocation.request_id);
            slots.live.insert(invocation.request_id.clone(), slot);
            self.pending.lock().push_back(invocation.clone());
            response
        };

        self.invocation_available.notify_one();
        tracing::debug!(request_id = %invocation.request_id, "Invocation enqueued");

        Ok(InvocationContext {
            request: invocation,
            response,
        })
    }

    /// Waits for the next invocation.
    ///
    /// Returns the shutdown placeholder instead of waiting once the server's
    /// shutdown signal or `cancel` fires.
    pub async fn next(&self, cancel: &CancellationToken) -> Dispatch {
        loop {
            if self.shutdown.is_cancelled() || cancel.is_cancelled() {
                return self.shutdown_placeholder();
            }

            // Register for the wakeup before looking at the queue so an
            // enqueue in between is not missed.
            let notified = self.invocation_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(dispatch) = self.try_next() {
                return dispatch;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.shutdown.cancelled() => return self.shutdown_placeholder(),
                _ = cancel.cancelled() => return self.shutdown_placeholder(),
            }
        }
    }

    /// Dispatches the head of the queue, if any, without waiting.
    pub fn try_next(&self) -> Option<Dispatch> {
        let invocation = {
            let mut slots = self.slots.lock();
            let invocation = self.pending.lock().pop_front()?;
            if let Some(slot) = slots.live.get_mut(&invocation.request_id) {
                slot.start_timer();
            }
            invocation
        };

        let dispatched = self.render(invocation);
        tracing::debug!(
            request_id = %dispatched.headers.request_id,
            trace_id = %dispatched.headers.trace_id,
            deadline_ms = dispatched.headers.deadline_ms(),
            "Invocation dispatched"
        );
        Some(Dispatch::Invocation(dispatched))
    }

    /// Routes a `/response` or `/error` body to the waiting caller.
    ///
    /// Unmatched completions are logged and recorded, never raised.
    pub fn complete(&self, request_id: &str, content: Bytes, is_successful: bool) -> CompletionOutcome {
        if request_id == SHUTDOWN_REQUEST_ID {
            self.slots.lock().live.remove(request_id);
            tracing::debug!("Discarding completion of the shutdown placeholder");
            return CompletionOutcome::Placeholder;
        }

        let slot = {
            let mut slots = self.slots.lock();
            match slots.live.get(request_id).map(ResponseSlot::is_dispatched) {
                Some(false) => Err(OrphanReason::NotDispatched),
                Some(true) => match slots.live.remove(request_id) {
                    Some(slot) => {
                        slots
                            .retired
                            .insert(request_id.to_string(), OrphanReason::AlreadyCompleted);
                        Ok(slot)
                    }
                    None => Err(OrphanReason::Unknown),
                },
                None => Err(slots
                    .retired
                    .get(request_id)
                    .unwrap_or(OrphanReason::Unknown)),
            }
        };

        match slot {
            Ok(slot) => {
                if is_successful {
                    tracing::debug!(request_id = %request_id, "Invocation succeeded");
                } else {
                    tracing::error!(
                        request_id = %request_id,
                        error = %String::from_utf8_lossy(&content),
                        "Invocation failed"
                    );
                }

                if !slot.complete(content, is_successful) {
                    tracing::debug!(request_id = %request_id, "Caller stopped waiting for response");
                }
                if let Some(callback) = &self.on_completed {
                    callback(request_id, is_successful);
                }
                CompletionOutcome::Delivered
            }
            Err(reason) => {
                tracing::warn!(
                    request_id = %request_id,
                    ?reason,
                    is_successful,
                    "Could not find response slot for completion"
                );
                let mut orphans = self.orphans.lock();
                orphans.push_back(OrphanedCompletion {
                    request_id: request_id.to_string(),
                    is_successful,
                    reason,
                });
                if orphans.len() > ORPHAN_CAPACITY {
                    orphans.pop_front();
                }
                CompletionOutcome::Orphaned(reason)
            }
        }
    }

    /// Records a `/init/error` body. Not correlated with any invocation.
    pub fn fail_initialization(&self, content: Bytes) {
        tracing::error!(
            error = %String::from_utf8_lossy(&content),
            "Function failed to initialize"
        );
        *self.init_error.lock() = Some(content);
    }

    /// The most recent `/init/error` body.
    pub fn init_error(&self) -> Option<Bytes> {
        self.init_error.lock().clone()
    }

    /// Stops accepting work, releases long polls and force-closes every
    /// outstanding slot so its waiter sees `ResponseError::Closed`.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        let (force_closed, dropped) = {
            let mut slots = self.slots.lock();
            slots.closed = true;
            let force_closed: Vec<(String, ResponseSlot)> = slots.live.drain().collect();
            for (request_id, _) in &force_closed {
                if request_id != SHUTDOWN_REQUEST_ID {
                    slots
                        .retired
                        .insert(request_id.clone(), OrphanReason::ForceClosed);
                }
            }
            let mut pending = self.pending.lock();
            let dropped = pending.len();
            pending.clear();
            (force_closed, dropped)
        };

        self.shutdown.cancel();

        if !force_closed.is_empty() || dropped > 0 {
            tracing::info!(
                force_closed = force_closed.len(),
                dropped_pending = dropped,
                "Released outstanding invocations"
            );
        }
        drop(force_closed);
    }

    /// Returns `true` once [`Correlator::shutdown`] has run or the shutdown
    /// token has fired.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Completions that found no slot, oldest first. At most
    /// [`ORPHAN_CAPACITY`] are kept.
    pub fn orphaned_completions(&self) -> Vec<OrphanedCompletion> {
        self.orphans.lock().iter().cloned().collect()
    }

    /// Invocations enqueued but not yet dispatched.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Invocations enqueued but not yet completed, dispatched or not.
    pub fn in_flight_count(&self) -> usize {
        self.slots
            .lock()
            .live
            .keys()
            .filter(|id| id.as_str() != SHUTDOWN_REQUEST_ID)
            .count()
    }

    fn shutdown_placeholder(&self) -> Dispatch {
        self.slots
            .lock()
            .live
            .entry(SHUTDOWN_REQUEST_ID.to_string())
            .or_insert_with(|| ResponseSlot::new().0);

        tracing::debug!("Returning shutdown placeholder to runtime");
        Dispatch::ShutdownPlaceholder(self.render(Invocation {
            request_id: SHUTDOWN_REQUEST_ID.to_string(),
            payload: Bytes::from_static(SHUTDOWN_PAYLOAD),
            client_context: None,
            cognito_identity: None,
        }))
    }

    fn render(&self, invocation: Invocation) -> DispatchedInvocation {
        let now = Utc::now();
        let timeout_ms = i64::try_from(self.options.function_timeout.as_millis()).unwrap_or(i64::MAX);
        let deadline = now
            .checked_add_signed(TimeDelta::milliseconds(timeout_ms))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        DispatchedInvocation {
            headers: RuntimeHeaders {
                request_id: invocation.request_id,
                invoked_function_arn: self.options.function_arn.clone(),
                trace_id: generate_trace_id(now),
                deadline,
                client_context: invocation.client_context,
                cognito_identity: invocation.cognito_identity,
            },
            payload: invocation.payload,
        }
    }
}
