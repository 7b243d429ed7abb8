//! Pending requests and the handles their submitters hold.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{CordError, CordResult};
use crate::ratelimit::transport::CommandResponse;
use crate::route::{Command, RouteKey};

/// A command waiting in its bucket's queue.
#[derive(Debug)]
pub struct PendingRequest {
    pub(crate) command: Command,
    reply: oneshot::Sender<CordResult<CommandResponse>>,
    canceled: Arc<AtomicBool>,
    submitted_at: Instant,
}

impl PendingRequest {
    /// Create a request and the handle observing it.
    pub(crate) fn new(route: RouteKey, command: Command) -> (Self, CompletionHandle) {
        let (reply, rx) = oneshot::channel();
        let canceled = Arc::new(AtomicBool::new(false));
        let request = Self {
            command,
            reply,
            canceled: Arc::clone(&canceled),
            submitted_at: Instant::now(),
        };
        let handle = CompletionHandle {
            rx,
            canceled,
            route,
        };
        (request, handle)
    }

    /// The queued command.
    #[must_use]
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// When the request was submitted.
    #[must_use]
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Whether the submitter canceled the request.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Resolve the submitter's handle.
    pub(crate) fn complete(self, result: CordResult<CommandResponse>) {
        // The submitter may have dropped its handle; the outcome is then unobserved.
        let _ = self.reply.send(result);
    }
}

/// Observes the outcome of a submitted command.
///
/// Awaiting the handle yields the response or the failure. Dropping it does
/// not cancel the command: it is still sent, only the outcome is discarded.
/// Use [`cancel`](Self::cancel) to withdraw a command that has not been
/// dispatched yet.
#[derive(Debug)]
pub struct CompletionHandle {
    rx: oneshot::Receiver<CordResult<CommandResponse>>,
    canceled: Arc<AtomicBool>,
    route: RouteKey,
}

impl CompletionHandle {
    /// The bucket the command was queued on.
    #[must_use]
    pub fn route(&self) -> &RouteKey {
        &self.route
    }

    /// Withdraw the command.
    ///
    /// Effective only while the command is still queued; once dispatch has
    /// started the command may be executed anyway.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// Whether [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Wait at most `timeout` for the outcome.
    ///
    /// On expiry the command is canceled if it is still queued; a command
    /// already dispatched may still be executed remotely.
    pub async fn wait_timeout(self, timeout: Duration) -> CordResult<CommandResponse> {
        let canceled = Arc::clone(&self.canceled);
        if let Ok(result) = tokio::time::timeout(timeout, self).await {
            result
        } else {
            canceled.store(true, Ordering::SeqCst);
            Err(CordError::Timeout(timeout))
        }
    }
}

impl Future for CompletionHandle {
    type Output = CordResult<CommandResponse>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CordError::Canceled)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Method;

    fn request() -> (PendingRequest, CompletionHandle) {
        let command = Command::rest(Method::Get, "/users/@me");
        PendingRequest::new(command.route(), command)
    }

    #[tokio::test]
    async fn test_handle_resolves_with_response() {
        let (request, handle) = request();
        request.complete(Ok(CommandResponse::ok()));
        let response = handle.await.unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_handle_resolves_canceled_when_request_dropped() {
        let (request, handle) = request();
        drop(request);
        assert!(matches!(handle.await, Err(CordError::Canceled)));
    }

    #[test]
    fn test_cancel_is_visible_to_request() {
        let (request, handle) = request();
        assert!(!request.is_canceled());
        handle.cancel();
        assert!(request.is_canceled());
        assert!(handle.is_canceled());
    }

    #[test]
    fn test_dropping_handle_does_not_cancel() {
        let (request, handle) = request();
        drop(handle);
        assert!(!request.is_canceled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_cancels_queued_request() {
        let (request, handle) = request();
        let result = handle.wait_timeout(Duration::from_secs(2)).await;
        assert!(matches!(result, Err(CordError::Timeout(d)) if d == Duration::from_secs(2)));
        assert!(request.is_canceled());
    }

    #[test]
    fn test_handle_route() {
        let (_request, handle) = request();
        assert_eq!(handle.route().to_string(), "GET /users/@me");
    }
}
