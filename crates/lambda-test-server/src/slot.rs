//! Single-shot response slots correlating completions with their callers.

use crate::error::ResponseError;
use crate::invocation::{Invocation, InvocationResponse};
use bytes::Bytes;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Write half of an in-flight invocation, held by the correlator.
///
/// The sender is consumed by [`ResponseSlot::complete`], so a slot can be
/// written at most once.
#[derive(Debug)]
pub(crate) struct ResponseSlot {
    sender: oneshot::Sender<InvocationResponse>,
    dispatched_at: Option<Instant>,
}

impl ResponseSlot {
    /// Creates a slot and the pending response its caller waits on.
    pub(crate) fn new() -> (Self, PendingResponse) {
        let (sender, receiver) = oneshot::channel();
        let slot = Self {
            sender,
            dispatched_at: None,
        };
        (slot, PendingResponse { receiver })
    }

    /// Starts the elapsed-time clock. Called when `/next` hands the
    /// invocation to the runtime.
    pub(crate) fn start_timer(&mut self) {
        self.dispatched_at = Some(Instant::now());
    }

    /// Returns `true` once `/next` has handed the invocation out.
    pub(crate) fn is_dispatched(&self) -> bool {
        self.dispatched_at.is_some()
    }

    /// Stops the clock and delivers the response.
    ///
    /// Returns `false` if the waiting side has already gone away.
    pub(crate) fn complete(self, content: Bytes, is_successful: bool) -> bool {
        let duration = self
            .dispatched_at
            .map(|started| started.elapsed())
            .unwrap_or_default();

        self.sender
            .send(InvocationResponse {
                content,
                is_successful,
                duration,
            })
            .is_ok()
    }
}

/// The response side of an enqueued invocation.
///
/// Resolves once the function posts to `/response` or `/error`, or with
/// [`ResponseError::Closed`] if the server is disposed first.
#[derive(Debug)]
pub struct PendingResponse {
    receiver: oneshot::Receiver<InvocationResponse>,
}

impl PendingResponse {
    /// Waits for the response.
    ///
    /// # Errors
    ///
    /// Returns `ResponseError::Closed` if the server shut down before the
    /// function completed the invocation.
    pub async fn recv(self) -> Result<InvocationResponse, ResponseError> {
        self.receiver.await.map_err(|_| ResponseError::Closed)
    }

    /// Waits for the response for at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ResponseError::Timeout` if nothing arrived in time, or
    /// `ResponseError::Closed` if the server shut down.
    pub async fn recv_timeout(self, timeout: Duration) -> Result<InvocationResponse, ResponseError> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ResponseError::Closed),
            Err(_) => Err(ResponseError::Timeout(timeout)),
        }
    }

    /// Returns the response if it has already arrived.
    ///
    /// `Ok(None)` means the invocation is still in-flight.
    ///
    /// # Errors
    ///
    /// Returns `ResponseError::Closed` if the server shut down.
    pub fn try_recv(&mut self) -> Result<Option<InvocationResponse>, ResponseError> {
        match self.receiver.try_recv() {
            Ok(response) => Ok(Some(response)),
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => Err(ResponseError::Closed),
        }
    }
}

/// What an enqueue hands back to the caller: the request as queued and the
/// handle for its response.
#[derive(Debug)]
pub struct InvocationContext {
    /// The invocation as it will be dispatched.
    pub request: Invocation,

    /// Resolves with the function's response.
    pub response: PendingResponse,
}

impl InvocationContext {
    /// The request ID the runtime will see.
    pub fn request_id(&self) -> &str {
        &self.request.request_id
    }
}
